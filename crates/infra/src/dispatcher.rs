//! Concurrent capability dispatch.
//!
//! Every operation runs as its own task with its own timeout. A slow, failing
//! or panicking provider only affects its own slot in the output.

use std::time::Duration;

use futures::future::{BoxFuture, join_all};
use tracing::warn;

use spendlens_ai::ProviderError;
use spendlens_core::{Capability, GatewayError, GatewayResult};

/// One capability call, ready to run.
pub struct Operation<T> {
    pub capability: Capability,
    pub call: BoxFuture<'static, Result<T, ProviderError>>,
}

impl<T> Operation<T> {
    pub fn new<F>(capability: Capability, call: F) -> Self
    where
        F: Future<Output = Result<T, ProviderError>> + Send + 'static,
    {
        Self {
            capability,
            call: Box::pin(call),
        }
    }
}

impl<T> std::fmt::Debug for Operation<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operation")
            .field("capability", &self.capability)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct ConcurrentDispatcher {
    call_timeout: Duration,
}

impl ConcurrentDispatcher {
    pub fn new(call_timeout: Duration) -> Self {
        Self { call_timeout }
    }

    /// Run all operations concurrently. Output `i` belongs to input `i`.
    pub async fn dispatch<T>(&self, operations: Vec<Operation<T>>) -> Vec<GatewayResult<T>>
    where
        T: Send + 'static,
    {
        join_all(operations.into_iter().map(|op| self.run(op))).await
    }

    pub async fn dispatch_one<T>(&self, operation: Operation<T>) -> GatewayResult<T>
    where
        T: Send + 'static,
    {
        self.run(operation).await
    }

    /// Two heterogeneous operations side by side.
    pub async fn dispatch_pair<A, B>(
        &self,
        a: Operation<A>,
        b: Operation<B>,
    ) -> (GatewayResult<A>, GatewayResult<B>)
    where
        A: Send + 'static,
        B: Send + 'static,
    {
        tokio::join!(self.run(a), self.run(b))
    }

    async fn run<T>(&self, op: Operation<T>) -> GatewayResult<T>
    where
        T: Send + 'static,
    {
        let capability = op.capability;
        let mut handle = tokio::spawn(op.call);

        match tokio::time::timeout(self.call_timeout, &mut handle).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(err))) => {
                warn!(capability = %capability, error = %err, "capability call failed");
                Err(GatewayError::capability_failure(capability, "capability call failed"))
            }
            Ok(Err(join_err)) => {
                warn!(capability = %capability, error = %join_err, "capability task aborted");
                Err(GatewayError::capability_failure(capability, "capability task aborted"))
            }
            Err(_) => {
                handle.abort();
                let timeout_ms = u64::try_from(self.call_timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(capability = %capability, timeout_ms, "capability call timed out");
                Err(GatewayError::CapabilityTimeout {
                    capability,
                    timeout_ms,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn delayed(capability: Capability, ms: u64, value: usize) -> Operation<usize> {
        Operation::new(capability, async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(value)
        })
    }

    #[tokio::test]
    async fn batch_preserves_input_order() {
        let dispatcher = ConcurrentDispatcher::new(Duration::from_secs(1));
        let ops = vec![
            delayed(Capability::Categorization, 30, 0),
            delayed(Capability::Categorization, 1, 1),
            delayed(Capability::Categorization, 15, 2),
        ];
        let out: Vec<usize> = dispatcher
            .dispatch(ops)
            .await
            .into_iter()
            .map(Result::unwrap)
            .collect();
        assert_eq!(out, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn timed_out_item_does_not_affect_siblings() {
        let dispatcher = ConcurrentDispatcher::new(Duration::from_millis(50));
        let ops = vec![
            delayed(Capability::Categorization, 1, 0),
            delayed(Capability::Categorization, 5_000, 1),
            delayed(Capability::Categorization, 1, 2),
        ];
        let out = dispatcher.dispatch(ops).await;
        assert_eq!(out[0], Ok(0));
        assert_eq!(
            out[1],
            Err(GatewayError::CapabilityTimeout {
                capability: Capability::Categorization,
                timeout_ms: 50,
            })
        );
        assert_eq!(out[2], Ok(2));
    }

    fn explode() -> Result<usize, ProviderError> {
        panic!("provider bug")
    }

    #[tokio::test]
    async fn provider_error_and_panic_are_capability_failures() {
        let dispatcher = ConcurrentDispatcher::new(Duration::from_secs(1));
        let failing: Operation<usize> = Operation::new(Capability::FraudDetection, async {
            Err(ProviderError::inference("model offline"))
        });
        let panicking = Operation::new(Capability::Ocr, async { explode() });

        let (a, b) = dispatcher.dispatch_pair(failing, panicking).await;
        let err = a.unwrap_err();
        assert_eq!(err.capability(), Some(Capability::FraudDetection));
        assert_eq!(err.code(), "capability_failure");
        // Diagnostic text stays in the logs.
        assert!(!err.to_string().contains("model offline"));
        assert_eq!(b.unwrap_err().capability(), Some(Capability::Ocr));
    }

    #[tokio::test]
    async fn items_run_concurrently() {
        let dispatcher = ConcurrentDispatcher::new(Duration::from_secs(2));
        let ops: Vec<_> = (0..10)
            .map(|i| delayed(Capability::AutoTagging, 100, i))
            .collect();
        let started = std::time::Instant::now();
        let out = dispatcher.dispatch(ops).await;
        assert_eq!(out.len(), 10);
        assert!(started.elapsed() < Duration::from_millis(900));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn every_input_gets_exactly_one_outcome_in_order(
            plan in proptest::collection::vec((0u64..20, any::<bool>()), 1..24)
        ) {
            let rt = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_time()
                .build()
                .unwrap();
            let dispatcher = ConcurrentDispatcher::new(Duration::from_secs(2));
            let ops: Vec<Operation<usize>> = plan
                .iter()
                .enumerate()
                .map(|(i, (ms, fails))| {
                    let (ms, fails) = (*ms, *fails);
                    Operation::new(Capability::Categorization, async move {
                        tokio::time::sleep(Duration::from_millis(ms)).await;
                        if fails {
                            Err(ProviderError::inference("scripted"))
                        } else {
                            Ok(i)
                        }
                    })
                })
                .collect();

            let out = rt.block_on(dispatcher.dispatch(ops));
            prop_assert_eq!(out.len(), plan.len());
            for (i, (result, (_, fails))) in out.iter().zip(plan.iter()).enumerate() {
                match result {
                    Ok(v) => {
                        prop_assert!(!fails);
                        prop_assert_eq!(*v, i);
                    }
                    Err(e) => {
                        prop_assert!(*fails);
                        prop_assert_eq!(e.code(), "capability_failure");
                    }
                }
            }
        }
    }
}
