//! Replaces the process-wide panic hook, so it lives in its own test binary.

use async_trait::async_trait;
use roomlog::{logger, ClientError, HtmlMessage, MatrixHook, MessagingClient};
use std::panic;
use std::sync::Arc;

struct DiscardingClient;

#[async_trait]
impl MessagingClient for DiscardingClient {
    async fn send_message_event(
        &self,
        _room_id: &str,
        _event_type: &str,
        _content: &HtmlMessage,
    ) -> Result<String, ClientError> {
        Ok("$discarded".to_string())
    }
}

#[tokio::test]
async fn panics_reach_the_hook() {
    let hook = Arc::new(
        MatrixHook::builder()
            .client(DiscardingClient)
            .room_id("!r:x")
            .build()
            .unwrap(),
    );
    logger::install_panic_hook(hook.clone());

    let result = std::thread::spawn(|| panic!("worker exploded")).join();
    let _ = panic::take_hook();

    assert!(result.is_err());
    let pending = hook.pending();
    assert_eq!(pending.len(), 1);
    assert!(pending[0].starts_with(r#"<font color="red">[location="#));
    assert!(pending[0].ends_with(" - worker exploded</font>"));
}
