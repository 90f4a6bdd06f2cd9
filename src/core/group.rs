//! First-error-wins task group.
//!
//! Every task runs to completion; the first task to fail records its error
//! in a set-once slot and cancels the group's token so the remaining tasks
//! can wind down cooperatively.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, OnceLock};

use futures::FutureExt;
use tokio::task::JoinSet;
use tracing::debug;

use super::cancel::CancelToken;
use super::error::BuildError;

/// Join barrier over heterogeneous tasks sharing one cancellation scope
pub struct TaskGroup<T> {
    tasks: JoinSet<Option<T>>,
    names: Vec<&'static str>,
    cancel: CancelToken,
    first_error: Arc<OnceLock<BuildError>>,
}

impl<T: Send + 'static> TaskGroup<T> {
    /// Create a group whose token is a child of `parent`
    pub fn new(parent: &CancelToken) -> Self {
        Self {
            tasks: JoinSet::new(),
            names: Vec::new(),
            cancel: parent.child(),
            first_error: Arc::new(OnceLock::new()),
        }
    }

    /// The group's shared cancellation scope
    pub fn token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Names of launched tasks, in launch order
    pub fn task_names(&self) -> &[&'static str] {
        &self.names
    }

    pub fn spawn<F>(&mut self, name: &'static str, task: F)
    where
        F: Future<Output = Result<T, BuildError>> + Send + 'static,
    {
        let cancel = self.cancel.clone();
        let slot = Arc::clone(&self.first_error);
        self.names.push(name);
        self.tasks.spawn(async move {
            match AssertUnwindSafe(task).catch_unwind().await {
                Ok(Ok(output)) => Some(output),
                Ok(Err(err)) => {
                    debug!(task = name, error = %err, "task failed");
                    record_failure(&slot, &cancel, err);
                    None
                }
                Err(payload) => {
                    let err = BuildError::Task {
                        task: name.to_string(),
                        message: panic_message(payload.as_ref()),
                    };
                    record_failure(&slot, &cancel, err);
                    None
                }
            }
        });
    }

    /// Wait for every task, then return all outputs or the first error.
    ///
    /// Outputs are in completion order.
    pub async fn wait(mut self) -> Result<Vec<T>, BuildError> {
        let mut outputs = Vec::with_capacity(self.names.len());

        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(Some(output)) => outputs.push(output),
                Ok(None) => {}
                Err(join_err) => {
                    let err = BuildError::Task {
                        task: "unknown".to_string(),
                        message: join_err.to_string(),
                    };
                    record_failure(&self.first_error, &self.cancel, err);
                }
            }
        }

        match self.first_error.get() {
            Some(err) => Err(err.clone()),
            None => Ok(outputs),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", msg)
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("panicked: {}", msg)
    } else {
        "panicked".to_string()
    }
}

fn record_failure(slot: &OnceLock<BuildError>, cancel: &CancelToken, err: BuildError) {
    if slot.set(err).is_ok() {
        cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_all_succeed() {
        let root = CancelToken::new();
        let mut group = TaskGroup::new(&root);
        group.spawn("a", async { Ok(1) });
        group.spawn("b", async { Ok(2) });

        let mut outputs = group.wait().await.unwrap();
        outputs.sort();
        assert_eq!(outputs, vec![1, 2]);
        assert!(!root.is_cancelled());
    }

    #[tokio::test]
    async fn test_first_error_wins_and_cancels_siblings() {
        let root = CancelToken::new();
        let mut group: TaskGroup<()> = TaskGroup::new(&root);
        let token = group.token();

        group.spawn("slow", async move {
            token.cancelled().await;
            Err(BuildError::Cancelled)
        });
        group.spawn("fail", async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Err(BuildError::Solve("boom".to_string()))
        });

        let err = tokio::time::timeout(Duration::from_secs(2), group.wait())
            .await
            .expect("group hung")
            .unwrap_err();
        assert!(err.same_as(&BuildError::Solve("boom".to_string())));
        assert!(!root.is_cancelled());
    }

    #[tokio::test]
    async fn test_panicking_task_is_reported() {
        let root = CancelToken::new();
        let mut group: TaskGroup<()> = TaskGroup::new(&root);
        group.spawn("panics", async {
            let missing: Option<()> = None;
            missing.expect("kaboom");
            Ok(())
        });

        match group.wait().await.unwrap_err() {
            BuildError::Task { task, message } => {
                assert_eq!(task, "panics");
                assert!(message.contains("kaboom"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_parent_cancellation_reaches_group() {
        let root = CancelToken::new();
        let mut group: TaskGroup<()> = TaskGroup::new(&root);
        let token = group.token();
        group.spawn("waits", async move {
            token.cancelled().await;
            Ok(())
        });

        root.cancel();
        tokio::time::timeout(Duration::from_secs(1), group.wait())
            .await
            .expect("group did not observe parent cancellation")
            .unwrap();
    }
}
