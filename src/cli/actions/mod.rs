pub mod prune;
pub mod server;

// Interpreter for `Action`; the match lives in `run` so this file stays small.
mod run;

#[derive(Debug)]
pub enum Action {
    Server(server::Args),
    Prune(prune::Args),
}

impl Action {
    /// Execute the action.
    /// # Errors
    /// Returns an error if the action fails.
    pub async fn execute(self) -> anyhow::Result<()> {
        run::execute(self).await
    }
}
