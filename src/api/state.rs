use crossbeam_channel::Sender;

use super::commands::ApiCommand;

#[derive(Clone)]
pub(super) struct AppState {
    pub(super) sender: Sender<ApiCommand>,
}

impl AppState {
    /// Sends a command to the frame thread and waits for its reply.
    pub(super) async fn ask<T>(
        &self,
        build: impl FnOnce(tokio::sync::oneshot::Sender<T>) -> ApiCommand,
    ) -> Result<T, String> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(build(tx))
            .map_err(|_| "Session is not running".to_string())?;
        rx.await.map_err(|_| "Channel closed".to_string())
    }
}
