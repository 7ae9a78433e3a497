//! Connected-component scan for checkbox-shaped ink blobs

use crate::quiz::color::ColorMatcher;
use crate::quiz::config::AnalysisConfig;
use image::RgbaImage;

/// 8-connected neighborhood
const NEIGHBORS: [(i64, i64); 8] = [
    (1, 0),
    (-1, 0),
    (0, 1),
    (0, -1),
    (1, 1),
    (1, -1),
    (-1, 1),
    (-1, -1),
];

/// Inclusive pixel bounding box of a connected component
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub min_x: u32,
    pub max_x: u32,
    pub min_y: u32,
    pub max_y: u32,
}

impl BoundingBox {
    pub fn new(min_x: u32, max_x: u32, min_y: u32, max_y: u32) -> Self {
        Self {
            min_x,
            max_x,
            min_y,
            max_y,
        }
    }

    fn point(x: u32, y: u32) -> Self {
        Self::new(x, x, y, y)
    }

    fn expand(&mut self, x: u32, y: u32) {
        self.min_x = self.min_x.min(x);
        self.max_x = self.max_x.max(x);
        self.min_y = self.min_y.min(y);
        self.max_y = self.max_y.max(y);
    }

    pub fn width(&self) -> u32 {
        self.max_x - self.min_x + 1
    }

    pub fn height(&self) -> u32 {
        self.max_y - self.min_y + 1
    }

    pub fn center(&self) -> (f32, f32) {
        (
            (self.min_x + self.max_x) as f32 / 2.0,
            (self.min_y + self.max_y) as f32 / 2.0,
        )
    }
}

/// Per-pixel ink classification of a page raster, computed once per page.
#[derive(Debug, Clone)]
pub struct InkMask {
    width: u32,
    height: u32,
    ink: Vec<bool>,
}

impl InkMask {
    pub fn from_image(image: &RgbaImage, matcher: &ColorMatcher) -> Self {
        let (width, height) = image.dimensions();
        let ink = image.pixels().map(|p| matcher.is_ink_pixel(p)).collect();
        Self { width, height, ink }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    /// Out-of-bounds coordinates are never ink
    #[inline]
    pub fn is_ink(&self, x: u32, y: u32) -> bool {
        x < self.width && y < self.height && self.ink[self.index(x, y)]
    }

    /// Number of ink pixels in the inclusive rectangle
    pub fn count_ink(&self, min_x: u32, max_x: u32, min_y: u32, max_y: u32) -> usize {
        (min_y..=max_y)
            .flat_map(|y| (min_x..=max_x).map(move |x| (x, y)))
            .filter(|&(x, y)| self.is_ink(x, y))
            .count()
    }
}

/// Find the connected ink components of a page and keep the checkbox-sized ones.
///
/// Components come out in raster order of their first pixel.
pub fn scan_candidates(mask: &InkMask, config: &AnalysisConfig) -> Vec<BoundingBox> {
    let size_range = config.box_size_range();
    let mut visited = vec![false; mask.ink.len()];
    let mut stack = Vec::new();
    let mut candidates = Vec::new();

    for y in 0..mask.height {
        for x in 0..mask.width {
            let idx = mask.index(x, y);
            if visited[idx] || !mask.ink[idx] {
                continue;
            }

            let component = flood_fill(mask, x, y, &mut visited, &mut stack);
            if size_range.contains(&component.width()) && size_range.contains(&component.height())
            {
                candidates.push(component);
            }
        }
    }

    tracing::trace!(candidates = candidates.len(), "component scan finished");
    candidates
}

/// Stack-based 8-connected flood fill from an unvisited ink seed
fn flood_fill(
    mask: &InkMask,
    start_x: u32,
    start_y: u32,
    visited: &mut [bool],
    stack: &mut Vec<(u32, u32)>,
) -> BoundingBox {
    let mut bounds = BoundingBox::point(start_x, start_y);
    visited[mask.index(start_x, start_y)] = true;
    stack.clear();
    stack.push((start_x, start_y));

    while let Some((cx, cy)) = stack.pop() {
        bounds.expand(cx, cy);

        for (dx, dy) in NEIGHBORS {
            let nx = cx as i64 + dx;
            let ny = cy as i64 + dy;
            if nx < 0 || ny < 0 || nx >= mask.width as i64 || ny >= mask.height as i64 {
                continue;
            }

            let (nx, ny) = (nx as u32, ny as u32);
            let nidx = mask.index(nx, ny);
            if !visited[nidx] && mask.ink[nidx] {
                visited[nidx] = true;
                stack.push((nx, ny));
            }
        }
    }

    bounds
}
