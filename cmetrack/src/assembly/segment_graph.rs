//! Explicit merge/split structure of a compound track.

use crate::input::{EventKind, RawTrack};

/// Frame span of one segment, absolute frames inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentNode {
    pub segment: usize,
    pub first_frame: usize,
    pub last_frame: usize,
}

impl SegmentNode {
    pub fn n_frames(&self) -> usize {
        self.last_frame - self.first_frame + 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    /// `child` starts by splitting off `parent`.
    Split,
    /// `child` ends by merging into `parent`.
    Merge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentEdge {
    pub kind: EdgeKind,
    pub frame: usize,
    pub child: usize,
    pub parent: usize,
}

/// Segments of a compound track with their split and merge links.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentGraph {
    nodes: Vec<Option<SegmentNode>>,
    edges: Vec<SegmentEdge>,
}

impl SegmentGraph {
    /// Build from tracker output. Segments without any detection have no node.
    pub fn from_raw(raw: &RawTrack) -> Self {
        let nodes = raw
            .feature_indices
            .iter()
            .enumerate()
            .map(|(segment, row)| {
                let first = row.iter().position(Option::is_some)?;
                let last = row.iter().rposition(Option::is_some)?;
                Some(SegmentNode {
                    segment,
                    first_frame: raw.start_frame + first,
                    last_frame: raw.start_frame + last,
                })
            })
            .collect::<Vec<_>>();

        let edges = raw
            .events
            .iter()
            .filter_map(|event| {
                let parent = event.partner?;
                let kind = match event.kind {
                    EventKind::Start => EdgeKind::Split,
                    EventKind::End => EdgeKind::Merge,
                };
                Some(SegmentEdge {
                    kind,
                    frame: event.frame,
                    child: event.segment,
                    parent,
                })
            })
            .filter(|edge| edge.child < nodes.len() && edge.parent < nodes.len())
            .collect();

        Self { nodes, edges }
    }

    pub fn node(&self, segment: usize) -> Option<&SegmentNode> {
        self.nodes.get(segment)?.as_ref()
    }

    /// Surviving segments in segment order.
    pub fn segments(&self) -> impl Iterator<Item = &SegmentNode> {
        self.nodes.iter().flatten()
    }

    pub fn n_segments(&self) -> usize {
        self.segments().count()
    }

    pub fn edges(&self) -> &[SegmentEdge] {
        &self.edges
    }

    fn parent_of(&self, child: usize, kind: EdgeKind) -> Option<usize> {
        self.edges
            .iter()
            .find(|e| e.child == child && e.kind == kind)
            .map(|e| e.parent)
    }

    /// Whether a short segment is a spurious branch: it splits from and
    /// merges back into the same parent, or its span lies strictly inside a
    /// parent's span.
    fn is_spurious_branch(&self, node: &SegmentNode) -> bool {
        let split_parent = self.parent_of(node.segment, EdgeKind::Split);
        let merge_parent = self.parent_of(node.segment, EdgeKind::Merge);
        if split_parent.is_some() && split_parent == merge_parent {
            return true;
        }
        [split_parent, merge_parent]
            .into_iter()
            .flatten()
            .filter_map(|p| self.node(p))
            .any(|parent| {
                node.first_frame > parent.first_frame && node.last_frame < parent.last_frame
            })
    }

    /// Remove single-frame segments and spurious branches shorter than
    /// `min_segment_length`, then drop edges that lost an endpoint.
    /// Returns the number of segments removed.
    pub fn prune(&mut self, min_segment_length: usize) -> usize {
        let doomed: Vec<usize> = self
            .segments()
            .filter(|node| {
                node.n_frames() == 1
                    || (node.n_frames() < min_segment_length && self.is_spurious_branch(node))
            })
            .map(|node| node.segment)
            .collect();

        for &segment in &doomed {
            self.nodes[segment] = None;
        }
        let nodes = &self.nodes;
        self.edges
            .retain(|e| nodes[e.child].is_some() && nodes[e.parent].is_some());
        doomed.len()
    }
}
