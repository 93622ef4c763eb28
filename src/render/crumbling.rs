//! Block-breaking overlay draws
//!
//! Crumbling changes every tick independently of instance data, so it never
//! touches a group's steady-state buffers. Each surviving (instance, draw)
//! pair gets its own single-instance command in a scratch buffer and is drawn
//! with the crumbling variant of its material.

use std::collections::BTreeMap;

use crate::constants::CRUMBLING_STAGES;
use crate::core::{InstanceHandle, InstancerId};

/// Instances making up one breaking block
#[derive(Debug, Clone)]
pub struct CrumblingBlock {
    /// Breaking stage, valid in `0..CRUMBLING_STAGES`
    pub progress: i32,
    pub instances: Vec<InstanceHandle>,
}

/// Where a live handle currently points inside a draw manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct CrumblingInstance {
    pub instancer: InstancerId,
    pub index: u32,
}

/// Crumbling work sorted by group, then progress, then instance
pub(crate) type CrumblingBatches = BTreeMap<usize, BTreeMap<u8, Vec<CrumblingInstance>>>;

/// Sort `blocks` into batches.
///
/// `locate` resolves a handle to its group position; handles it rejects
/// (owned by another manager, deleted, or of an unknown instancer) are skipped,
/// as are blocks whose progress is out of range.
pub(crate) fn batch_crumbling(
    blocks: &[CrumblingBlock],
    locate: impl Fn(&InstanceHandle) -> Option<(usize, CrumblingInstance)>,
) -> CrumblingBatches {
    let mut batches = CrumblingBatches::new();
    for block in blocks {
        if !(0..CRUMBLING_STAGES).contains(&block.progress) {
            continue;
        }
        for handle in &block.instances {
            let Some((group, instance)) = locate(handle) else {
                continue;
            };
            batches
                .entry(group)
                .or_default()
                .entry(block.progress as u8)
                .or_default()
                .push(instance);
        }
    }

    for by_progress in batches.values_mut() {
        for instances in by_progress.values_mut() {
            instances.sort_unstable();
        }
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locate_even(handle: &InstanceHandle) -> Option<(usize, CrumblingInstance)> {
        let index = handle.index()?;
        (index % 2 == 0).then_some((
            index as usize / 4,
            CrumblingInstance {
                instancer: handle.instancer_id(),
                index,
            },
        ))
    }

    #[test]
    fn test_out_of_range_progress_is_skipped() {
        let blocks = [-1, 10, 11, 0, 9].map(|progress| CrumblingBlock {
            progress,
            instances: vec![InstanceHandle::new(0, InstancerId(0), 0)],
        });
        let batches = batch_crumbling(&blocks, locate_even);

        let stages: Vec<u8> = batches[&0].keys().copied().collect();
        assert_eq!(stages, vec![0, 9]);
    }

    #[test]
    fn test_rejected_handles_are_skipped() {
        let deleted = InstanceHandle::new(0, InstancerId(1), 2);
        deleted.clear();
        let block = CrumblingBlock {
            progress: 3,
            instances: vec![
                InstanceHandle::new(0, InstancerId(1), 6),
                InstanceHandle::new(0, InstancerId(1), 1),
                deleted,
                InstanceHandle::new(0, InstancerId(0), 4),
            ],
        };
        let batches = batch_crumbling(&[block], locate_even);

        assert_eq!(batches.len(), 1);
        assert_eq!(
            batches[&1][&3],
            vec![
                CrumblingInstance {
                    instancer: InstancerId(0),
                    index: 4
                },
                CrumblingInstance {
                    instancer: InstancerId(1),
                    index: 6
                },
            ]
        );
    }
}
