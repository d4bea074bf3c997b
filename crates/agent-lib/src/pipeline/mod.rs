//! Composable detection pipeline
//!
//! A pipeline is a chain of stages, each consuming one input per cycle and
//! pushing zero or more outputs to the downstream stage registered at
//! construction. Chains are assembled innermost-first: build the sink, hand
//! it to a detector, hand the detector to the cycle driver.

mod runner;
mod sink;
mod source;

pub use runner::{CycleConfig, DetectionLoop, DetectionLoopBuilder};
pub use sink::{ContentionFeed, ContentionSink};
pub use source::{JsonFeedSource, SnapshotSource};

use crate::models::Contention;
use anyhow::Result;

pub use async_trait::async_trait;

/// Contention events produced by one detection cycle.
pub type Contentions = Vec<Contention>;

/// One stage of the detection pipeline.
///
/// `consume` must be a pure function of the input and the stage's immutable
/// configuration, aside from per-executor state an extraction strategy
/// explicitly owns. A stage that returns an error must not have pushed
/// anything downstream for that cycle; the caller decides whether to skip
/// the cycle or halt the chain.
#[async_trait]
pub trait Stage<In>: Send {
    async fn consume(&mut self, input: &In) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Records every input it sees, for chain assertions.
    struct Recorder {
        seen: Arc<Mutex<Vec<i64>>>,
    }

    #[async_trait]
    impl Stage<i64> for Recorder {
        async fn consume(&mut self, input: &i64) -> Result<()> {
            self.seen.lock().unwrap().push(*input);
            Ok(())
        }
    }

    struct Doubler {
        downstream: Box<dyn Stage<i64>>,
    }

    #[async_trait]
    impl Stage<i64> for Doubler {
        async fn consume(&mut self, input: &i64) -> Result<()> {
            self.downstream.consume(&(input * 2)).await
        }
    }

    #[tokio::test]
    async fn test_stages_chain_through_downstream() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = Recorder { seen: seen.clone() };
        let mut head = Doubler {
            downstream: Box::new(recorder),
        };

        head.consume(&3).await.unwrap();
        head.consume(&5).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![6, 10]);
    }
}
