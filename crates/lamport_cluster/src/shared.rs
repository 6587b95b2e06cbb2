//! Replicated shared variable.
//!
//! Only the holder of the critical section writes, so under a correct mutex
//! writes are totally ordered. Replicas still keep the `(timestamp, writer)`
//! stamp of the last applied write and ignore anything older, which keeps a
//! delayed push from rolling a replica back.

use crate::mutex::CsPhase;
use crate::node::{Node, NodeError, NodeResult, Outbound};
use lamport_core::{LogicalTime, PeerId};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

/// Lamport stamp of one write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WriteStamp {
    /// Clock of the writer at write time
    pub timestamp: LogicalTime,
    /// Writing peer
    pub writer: PeerId,
}

/// Local replica
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaVariable {
    /// Current value
    pub value: i64,
    /// Stamp of the write that produced `value`
    pub stamp: Option<WriteStamp>,
}

impl ReplicaVariable {
    /// Apply a write unless a newer one is already in place
    pub fn apply(&mut self, value: i64, stamp: WriteStamp) -> bool {
        if Some(stamp) > self.stamp {
            self.value = value;
            self.stamp = Some(stamp);
            true
        } else {
            false
        }
    }
}

impl Node {
    /// Read the local replica
    pub async fn get_shared_variable(&self) -> i64 {
        self.variable.read().await.value
    }

    /// Write the variable and push it to every member
    ///
    /// # Errors
    ///
    /// `Dead` if the node is killed, `NotInCriticalSection` unless the node
    /// holds the critical section.
    #[instrument(skip(self), fields(node = %self.id))]
    pub async fn set_shared_variable(&self, value: i64) -> NodeResult<()> {
        if !self.is_alive() {
            return Err(NodeError::Dead);
        }

        let timestamp = {
            let section = self.section.lock().await;
            if section.phase != CsPhase::InCs {
                return Err(NodeError::NotInCriticalSection);
            }
            let timestamp = self.clock.tick();
            self.variable.write().await.apply(
                value,
                WriteStamp {
                    timestamp,
                    writer: self.id,
                },
            );
            timestamp
        };

        info!(clock = %timestamp, value, "shared variable written");
        self.broadcast(Outbound::Update {
            value,
            timestamp,
            source: self.id,
        })
        .await;
        Ok(())
    }

    /// Inbound replication push
    ///
    /// # Errors
    ///
    /// `Dead` after the dead-node delay if the node is killed.
    #[instrument(skip(self), fields(node = %self.id))]
    pub async fn update_shared_variable(
        &self,
        value: i64,
        timestamp: LogicalTime,
        source: PeerId,
    ) -> NodeResult<()> {
        self.ensure_alive().await?;
        self.clock.observe(timestamp);

        let applied = self.variable.write().await.apply(
            value,
            WriteStamp {
                timestamp,
                writer: source,
            },
        );
        if applied {
            info!(clock = %self.clock.now(), value, source = %source, "shared variable updated");
        } else {
            debug!(value, source = %source, timestamp = %timestamp, "ignoring stale update");
        }
        Ok(())
    }

    /// Value and stamp to hand a joiner
    pub(crate) async fn variable_transfer(&self) -> Outbound {
        let variable = *self.variable.read().await;
        let stamp = variable.stamp.unwrap_or(WriteStamp {
            timestamp: LogicalTime::zero(),
            writer: self.id,
        });
        Outbound::Update {
            value: variable.value,
            timestamp: stamp.timestamp,
            source: stamp.writer,
        }
    }
}
