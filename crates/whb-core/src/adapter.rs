//! Adapter lifecycle callbacks
//!
//! An adapter reacts to the host through four callbacks. The host side (or
//! an event loop over [`HostStore::subscribe`](crate::HostStore::subscribe))
//! drives them; the adapter never subclasses a host type.

use async_trait::async_trait;

use crate::models::{HostObject, StateValue, StoreEvent};

/// Lifecycle callbacks of one adapter instance
#[async_trait]
pub trait AdapterHandler: Send + Sync {
    /// Host is ready; connect and start working
    async fn on_ready(&self);

    /// An object was written (`Some`) or deleted (`None`)
    async fn on_object_change(&self, _id: &str, _object: Option<&HostObject>) {}

    /// A state was written (`Some`) or deleted (`None`)
    async fn on_state_change(&self, _id: &str, _state: Option<&StateValue>) {}

    /// Adapter is being stopped; cancel pending work
    async fn on_unload(&self);
}

/// Route one store event to the matching callback
pub async fn dispatch_event<H: AdapterHandler + ?Sized>(handler: &H, event: &StoreEvent) {
    match event {
        StoreEvent::ObjectChanged { id, object } => {
            handler.on_object_change(id, object.as_ref()).await
        }
        StoreEvent::StateChanged { id, state } => handler.on_state_change(id, state.as_ref()).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AdapterHandler for Recorder {
        async fn on_ready(&self) {}

        async fn on_object_change(&self, id: &str, object: Option<&HostObject>) {
            self.seen
                .lock()
                .push(format!("object {} {}", id, object.is_some()));
        }

        async fn on_state_change(&self, id: &str, state: Option<&StateValue>) {
            self.seen
                .lock()
                .push(format!("state {} {:?}", id, state.map(|s| s.ack)));
        }

        async fn on_unload(&self) {}
    }

    #[tokio::test]
    async fn test_dispatch() {
        let recorder = Recorder::default();
        dispatch_event(
            &recorder,
            &StoreEvent::StateChanged {
                id: "a".into(),
                state: Some(StateValue::new(json!(1), false)),
            },
        )
        .await;
        dispatch_event(
            &recorder,
            &StoreEvent::ObjectChanged {
                id: "b".into(),
                object: None,
            },
        )
        .await;

        assert_eq!(
            *recorder.seen.lock(),
            vec!["state a Some(false)".to_string(), "object b false".to_string()]
        );
    }
}
