//! Connected component labeling of segmentation masks using union-find.
//!
//! Works on horizontal runs of foreground pixels with 8-connectivity.
//! Background is label 0; components are numbered 1.. in raster order of
//! their first pixel.

use common::Buffer2;

/// A horizontal run of foreground pixels.
#[derive(Debug, Clone, Copy)]
struct Run {
    y: usize,
    start: usize, // inclusive
    end: usize,   // exclusive
    label: u32,
}

/// Label the 8-connected foreground components of `mask`.
pub fn label_components(mask: &Buffer2<bool>) -> Buffer2<u32> {
    let width = mask.width();
    let height = mask.height();

    let mut runs: Vec<Run> = Vec::new();
    let mut parent: Vec<u32> = vec![0];
    let mut prev_row = 0..0;

    for y in 0..height {
        let row_start = runs.len();
        let mut x = 0;
        while x < width {
            if !*mask.get(x, y) {
                x += 1;
                continue;
            }
            let start = x;
            while x < width && *mask.get(x, y) {
                x += 1;
            }
            runs.push(Run {
                y,
                start,
                end: x,
                label: 0,
            });
        }
        let row = row_start..runs.len();

        for i in row.clone() {
            let mut label = 0;
            for j in prev_row.clone() {
                let (prev, curr) = (runs[j], runs[i]);
                // 8-connected: runs overlap when expanded by one pixel.
                if prev.start < curr.end + 1 && prev.end + 1 > curr.start {
                    if label == 0 {
                        label = find(&mut parent, prev.label);
                    } else {
                        label = union(&mut parent, label, prev.label);
                    }
                }
            }
            if label == 0 {
                label = parent.len() as u32;
                parent.push(label);
            }
            runs[i].label = label;
        }
        prev_row = row;
    }

    // Resolve roots and renumber consecutively.
    let mut compact = vec![0u32; parent.len()];
    let mut next = 1;
    let mut labels = Buffer2::new_filled(width, height, 0u32);
    for run in &runs {
        let root = find(&mut parent, run.label) as usize;
        if compact[root] == 0 {
            compact[root] = next;
            next += 1;
        }
        for x in run.start..run.end {
            *labels.get_mut(x, run.y) = compact[root];
        }
    }
    labels
}

fn find(parent: &mut [u32], mut label: u32) -> u32 {
    while parent[label as usize] != label {
        let grandparent = parent[parent[label as usize] as usize];
        parent[label as usize] = grandparent;
        label = grandparent;
    }
    label
}

fn union(parent: &mut [u32], a: u32, b: u32) -> u32 {
    let ra = find(parent, a);
    let rb = find(parent, b);
    let (keep, drop) = if ra < rb { (ra, rb) } else { (rb, ra) };
    parent[drop as usize] = keep;
    keep
}
