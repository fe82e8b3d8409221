//! Counter server logic.

use crate::protocol::{CounterState, INCREMENT, RESET};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;
use uiport_server::{Args, BoxError, Server, ServerConfig, State, Update};

/// The authoritative counter.
#[derive(Debug, Clone, Default)]
pub struct Counter {
    // Held across the broadcast so updates go out in the order they happen.
    count: Arc<Mutex<i64>>,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self) -> i64 {
        *self.count.lock().await
    }

    /// Server configuration that serves this counter.
    pub fn config(&self) -> Result<ServerConfig, BoxError> {
        let baseline = State::from_typed(&CounterState::default())?;

        let increment = {
            let counter = self.clone();
            move |server: Server, args: Args| {
                let counter = counter.clone();
                async move {
                    let by = args.get::<Option<i64>>(0)?.unwrap_or(1);
                    let count = counter.set(&server, INCREMENT, |count| count + by).await?;
                    Ok::<_, BoxError>(json!(count))
                }
            }
        };
        let reset = {
            let counter = self.clone();
            move |server: Server, _args: Args| {
                let counter = counter.clone();
                async move {
                    let count = counter.set(&server, RESET, |_| 0).await?;
                    Ok::<_, BoxError>(json!(count))
                }
            }
        };

        Ok(ServerConfig::with_state(baseline)
            .on_connect(|| tracing::info!("client attached"))
            .on_disconnect(|| tracing::info!("client detached"))
            .handler(INCREMENT, increment)
            .handler(RESET, reset))
    }

    async fn set(
        &self,
        server: &Server,
        action: &str,
        change: impl FnOnce(i64) -> i64,
    ) -> Result<i64, BoxError> {
        let mut count = self.count.lock().await;
        *count = change(*count);
        let update = Update::from_typed(&CounterState {
            count: *count,
            last_action: Some(action.to_string()),
        })?;
        server.update_state(update).await?;
        Ok(*count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ENDPOINT;
    use uiport_client::Client;
    use uiport_core::Hub;

    #[tokio::test]
    async fn increments_and_resets() {
        let hub = Hub::new();
        let counter = Counter::new();
        let _server = Server::create(ENDPOINT, counter.config().unwrap(), hub.listen(ENDPOINT));

        let client = Client::new(ENDPOINT, hub.clone());
        let initial: CounterState = client.connect().await.unwrap().to_typed().unwrap();
        assert_eq!(initial, CounterState::default());

        let increment = client.actions().get(INCREMENT);
        assert_eq!(increment.call_as::<i64>(vec![json!(5)]).await.unwrap(), 5);
        assert_eq!(increment.call_as::<i64>(vec![]).await.unwrap(), 6);
        assert_eq!(counter.get().await, 6);

        let mirrored: CounterState = client.state().unwrap().to_typed().unwrap();
        assert_eq!(mirrored.count, 6);

        client.actions().call(RESET, vec![]).await.unwrap();
        let mirrored: CounterState = client.state().unwrap().to_typed().unwrap();
        assert_eq!(
            mirrored,
            CounterState {
                count: 0,
                last_action: Some(RESET.to_string()),
            }
        );
    }

    #[tokio::test]
    async fn late_client_sees_current_count() {
        let hub = Hub::new();
        let counter = Counter::new();
        let _server = Server::create(ENDPOINT, counter.config().unwrap(), hub.listen(ENDPOINT));

        let first = Client::new(ENDPOINT, hub.clone());
        first.connect().await.unwrap();
        first.call(INCREMENT, vec![json!(3)]).await.unwrap();
        first.disconnect().unwrap();

        let second = Client::new(ENDPOINT, hub.clone());
        let state: CounterState = second.connect().await.unwrap().to_typed().unwrap();
        assert_eq!(state.count, 3);
    }
}
