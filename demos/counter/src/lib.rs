//! Shared counter demo.
//!
//! One server holds a counter; any number of clients mirror it, bump it and
//! receive a periodic `tick` directive.
//!
//! Run:
//!   cargo run -p uiport-demo-counter --bin counter-server
//!   cargo run -p uiport-demo-counter --bin counter-client -- --by 5 --times 3

pub mod counter;
pub mod protocol;
