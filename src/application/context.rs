//! Correlation context carried across await points.
//!
//! The id lives in a tokio task-local, so it follows a future through every
//! `.await` (including `join_all` children polled by the same task) while
//! concurrent operations stay isolated. `tokio::spawn` starts a fresh task
//! with no id; pass one explicitly across that boundary.

use std::future::Future;

use crate::domain::CorrelationId;

tokio::task_local! {
    static CORRELATION_ID: CorrelationId;
}

/// Run `future` with `id` as the current correlation id.
pub async fn run_with_id<F>(id: CorrelationId, future: F) -> F::Output
where
    F: Future,
{
    CORRELATION_ID.scope(id, future).await
}

/// The correlation id of the enclosing [`run_with_id`] scope, if any.
#[must_use]
pub fn current_id() -> Option<CorrelationId> {
    CORRELATION_ID.try_with(Clone::clone).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn no_scope_means_no_id() {
        assert!(current_id().is_none());
    }

    #[tokio::test]
    async fn id_survives_await_points() {
        let seen = run_with_id(CorrelationId::from("req-1"), async {
            tokio::task::yield_now().await;
            tokio::time::sleep(Duration::from_millis(1)).await;
            current_id()
        })
        .await;

        assert_eq!(seen, Some(CorrelationId::from("req-1")));
        assert!(current_id().is_none());
    }

    #[tokio::test]
    async fn concurrent_scopes_are_isolated() {
        let scoped = |name: &'static str| {
            run_with_id(CorrelationId::from(name), async move {
                for _ in 0..5 {
                    tokio::task::yield_now().await;
                    assert_eq!(current_id().map(|id| id.to_string()).as_deref(), Some(name));
                }
                current_id()
            })
        };

        let (a, b) = tokio::join!(scoped("a"), scoped("b"));
        assert_eq!(a, Some(CorrelationId::from("a")));
        assert_eq!(b, Some(CorrelationId::from("b")));
    }

    #[tokio::test]
    async fn nested_scope_shadows_outer() {
        run_with_id(CorrelationId::from("outer"), async {
            let inner = run_with_id(CorrelationId::from("inner"), async { current_id() }).await;
            assert_eq!(inner, Some(CorrelationId::from("inner")));
            assert_eq!(current_id(), Some(CorrelationId::from("outer")));
        })
        .await;
    }
}
