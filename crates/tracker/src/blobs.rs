//! External contours of the foreground mask and their shape features.

use crate::segmentation::BACKGROUND;
use image::GrayImage;
use std::collections::VecDeque;
use std::f64::consts::PI;

/// Neighbour offsets, counterclockwise from east (image y grows downward).
const DIRECTIONS: [(i32, i32); 8] = [
    (1, 0),
    (1, -1),
    (0, -1),
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];
const WEST: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Blob {
    pub centroid: (f64, f64),
    pub area: f64,
    pub perimeter: f64,
    pub circularity: f64,
    pub bbox: BoundingBox,
    pub edge_reflection: bool,
}

/// Area bounds and border policy applied to raw contours.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlobFilter {
    pub min_area: f64,
    pub max_area: f64,
    pub edge_margin_frac: f64,
    pub edge_margin_min_px: u32,
    pub edge_ignore: bool,
}

impl BlobFilter {
    /// `max(min_px, frac * min(width, height))`, kept below half the smaller
    /// frame dimension so a centred blob can never be an edge blob.
    pub fn edge_margin(&self, width: u32, height: u32) -> f64 {
        let min_dim = width.min(height) as f64;
        let margin = (self.edge_margin_min_px as f64).max(self.edge_margin_frac * min_dim);
        let cap = (min_dim / 2.0 - 1.0).max(0.0);
        margin.min(cap)
    }

    pub fn is_edge(&self, bbox: &BoundingBox, width: u32, height: u32) -> bool {
        let m = self.edge_margin(width, height);
        let (x, y) = (bbox.x as f64, bbox.y as f64);
        let (w, h) = (bbox.width as f64, bbox.height as f64);
        x < m || y < m || x + w > width as f64 - m || y + h > height as f64 - m
    }
}

struct Component {
    /// First pixel in raster order.
    seed: (u32, u32),
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
    external: bool,
}

/// Find external blobs in a binary mask, in raster order of their top-left
/// pixel, keeping those that pass `filter`.
pub fn extract_blobs(mask: &GrayImage, filter: &BlobFilter) -> Vec<Blob> {
    let (width, height) = mask.dimensions();
    if width == 0 || height == 0 {
        return Vec::new();
    }
    let (labels, components) = label_components(mask);

    let mut blobs = Vec::new();
    for (index, component) in components.iter().enumerate() {
        if !component.external {
            continue;
        }
        let label = index as u32 + 1;
        let contour = trace_outer_contour(&labels, width, height, label, component.seed);

        let (area, m10, m01) = polygon_moments(&contour);
        if area < filter.min_area || area > filter.max_area {
            continue;
        }
        let perimeter = closed_perimeter(&contour);
        if perimeter == 0.0 {
            continue;
        }
        let circularity = 4.0 * PI * area / (perimeter * perimeter);
        let centroid = if area != 0.0 {
            (m10 / area, m01 / area)
        } else {
            (0.0, 0.0)
        };
        let bbox = BoundingBox {
            x: component.min_x,
            y: component.min_y,
            width: component.max_x - component.min_x + 1,
            height: component.max_y - component.min_y + 1,
        };
        let edge_reflection = filter.is_edge(&bbox, width, height);
        if edge_reflection && filter.edge_ignore {
            continue;
        }

        blobs.push(Blob {
            centroid,
            area,
            perimeter,
            circularity,
            bbox,
            edge_reflection,
        });
    }
    blobs
}

/// 8-connected labelling. Labels start at 1; 0 is background. A component
/// is external when it touches the frame or borders background that is
/// 4-connected to the outside, i.e. it does not sit inside another blob's hole.
fn label_components(mask: &GrayImage) -> (Vec<u32>, Vec<Component>) {
    let (width, height) = (mask.width() as usize, mask.height() as usize);
    let data = mask.as_raw();
    let is_fg = |i: usize| data[i] != BACKGROUND;

    let outside = outer_background(data, width, height);
    let mut labels = vec![0u32; width * height];
    let mut components = Vec::new();
    let mut queue = VecDeque::new();

    for start in 0..width * height {
        if !is_fg(start) || labels[start] != 0 {
            continue;
        }
        let label = components.len() as u32 + 1;
        let (sx, sy) = ((start % width) as u32, (start / width) as u32);
        let mut component = Component {
            seed: (sx, sy),
            min_x: sx,
            min_y: sy,
            max_x: sx,
            max_y: sy,
            external: false,
        };

        labels[start] = label;
        queue.push_back(start);
        while let Some(i) = queue.pop_front() {
            let (x, y) = ((i % width) as i32, (i / width) as i32);
            component.min_x = component.min_x.min(x as u32);
            component.max_x = component.max_x.max(x as u32);
            component.min_y = component.min_y.min(y as u32);
            component.max_y = component.max_y.max(y as u32);

            for (k, (dx, dy)) in DIRECTIONS.iter().enumerate() {
                let (nx, ny) = (x + dx, y + dy);
                if nx < 0 || ny < 0 || nx >= width as i32 || ny >= height as i32 {
                    component.external = true;
                    continue;
                }
                let n = ny as usize * width + nx as usize;
                if is_fg(n) {
                    if labels[n] == 0 {
                        labels[n] = label;
                        queue.push_back(n);
                    }
                } else if k % 2 == 0 && outside[n] {
                    component.external = true;
                }
            }
        }
        components.push(component);
    }
    (labels, components)
}

/// Background pixels 4-connected to the area around the frame.
fn outer_background(data: &[u8], width: usize, height: usize) -> Vec<bool> {
    let mut outside = vec![false; width * height];
    let mut queue = VecDeque::new();
    let mut seed = |i: usize, outside: &mut Vec<bool>, queue: &mut VecDeque<usize>| {
        if data[i] == BACKGROUND && !outside[i] {
            outside[i] = true;
            queue.push_back(i);
        }
    };
    for x in 0..width {
        seed(x, &mut outside, &mut queue);
        seed((height - 1) * width + x, &mut outside, &mut queue);
    }
    for y in 0..height {
        seed(y * width, &mut outside, &mut queue);
        seed(y * width + width - 1, &mut outside, &mut queue);
    }
    while let Some(i) = queue.pop_front() {
        let (x, y) = (i % width, i / width);
        if x > 0 {
            seed(i - 1, &mut outside, &mut queue);
        }
        if x + 1 < width {
            seed(i + 1, &mut outside, &mut queue);
        }
        if y > 0 {
            seed(i - width, &mut outside, &mut queue);
        }
        if y + 1 < height {
            seed(i + width, &mut outside, &mut queue);
        }
    }
    outside
}

/// Border following around the component's outer edge, starting from its
/// first raster pixel. Returns the boundary pixels in order; the contour is
/// implicitly closed.
fn trace_outer_contour(
    labels: &[u32],
    width: u32,
    height: u32,
    label: u32,
    start: (u32, u32),
) -> Vec<(i32, i32)> {
    let inside = |p: (i32, i32)| {
        p.0 >= 0
            && p.1 >= 0
            && p.0 < width as i32
            && p.1 < height as i32
            && labels[p.1 as usize * width as usize + p.0 as usize] == label
    };
    let step = |p: (i32, i32), d: usize| (p.0 + DIRECTIONS[d].0, p.1 + DIRECTIONS[d].1);
    let direction_to = |from: (i32, i32), to: (i32, i32)| {
        let delta = (to.0 - from.0, to.1 - from.1);
        DIRECTIONS.iter().position(|&d| d == delta).unwrap_or(WEST)
    };

    let p0 = (start.0 as i32, start.1 as i32);
    // Clockwise from west for the first neighbour.
    let Some(p1) = (0..8)
        .map(|k| step(p0, (WEST + 8 - k) % 8))
        .find(|&p| inside(p))
    else {
        return vec![p0];
    };

    let mut contour = Vec::new();
    let (mut prev, mut cur) = (p1, p0);
    loop {
        let back = direction_to(cur, prev);
        let next = (1..=8)
            .map(|k| step(cur, (back + k) % 8))
            .find(|&p| inside(p))
            .unwrap_or(prev);
        contour.push(cur);
        if next == p0 && cur == p1 {
            break;
        }
        prev = cur;
        cur = next;
    }
    contour
}

/// Shoelace area and first moments of the closed polygon.
fn polygon_moments(contour: &[(i32, i32)]) -> (f64, f64, f64) {
    let n = contour.len();
    if n < 3 {
        return (0.0, 0.0, 0.0);
    }
    let (mut a, mut mx, mut my) = (0.0f64, 0.0f64, 0.0f64);
    for i in 0..n {
        let (x0, y0) = (contour[i].0 as f64, contour[i].1 as f64);
        let (x1, y1) = (contour[(i + 1) % n].0 as f64, contour[(i + 1) % n].1 as f64);
        let cross = x0 * y1 - x1 * y0;
        a += cross;
        mx += (x0 + x1) * cross;
        my += (y0 + y1) * cross;
    }
    let area = a / 2.0;
    if area == 0.0 {
        return (0.0, 0.0, 0.0);
    }
    // Normalise orientation so the area is positive.
    let sign = area.signum();
    (area.abs(), sign * mx / 6.0, sign * my / 6.0)
}

fn closed_perimeter(contour: &[(i32, i32)]) -> f64 {
    let n = contour.len();
    if n < 2 {
        return 0.0;
    }
    (0..n)
        .map(|i| {
            let (a, b) = (contour[i], contour[(i + 1) % n]);
            (((b.0 - a.0).pow(2) + (b.1 - a.1).pow(2)) as f64).sqrt()
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn any_size() -> BlobFilter {
        BlobFilter {
            min_area: 0.0,
            max_area: f64::MAX,
            edge_margin_frac: 0.05,
            edge_margin_min_px: 12,
            edge_ignore: false,
        }
    }

    fn fill_rect(mask: &mut GrayImage, x0: u32, y0: u32, w: u32, h: u32) {
        for y in y0..y0 + h {
            for x in x0..x0 + w {
                mask.put_pixel(x, y, Luma([255]));
            }
        }
    }

    fn fill_disc(mask: &mut GrayImage, cx: i32, cy: i32, r: i32) {
        for y in 0..mask.height() as i32 {
            for x in 0..mask.width() as i32 {
                if (x - cx).pow(2) + (y - cy).pow(2) <= r * r {
                    mask.put_pixel(x as u32, y as u32, Luma([255]));
                }
            }
        }
    }

    #[test]
    fn test_zero_sized_mask_has_no_blobs() {
        for (w, h) in [(0, 0), (5, 0), (0, 7)] {
            assert!(extract_blobs(&GrayImage::new(w, h), &any_size()).is_empty());
        }
    }

    #[test]
    fn test_square_contour_geometry() {
        let mut mask = GrayImage::new(50, 50);
        fill_rect(&mut mask, 20, 20, 10, 10);
        let blobs = extract_blobs(&mask, &any_size());

        assert_eq!(blobs.len(), 1);
        let blob = &blobs[0];
        // Polygon through pixel centres: 9 x 9.
        assert_eq!(blob.area, 81.0);
        assert_eq!(blob.perimeter, 36.0);
        assert!((blob.centroid.0 - 24.5).abs() < 1e-9);
        assert!((blob.centroid.1 - 24.5).abs() < 1e-9);
        assert_eq!(
            blob.bbox,
            BoundingBox {
                x: 20,
                y: 20,
                width: 10,
                height: 10
            }
        );
        assert!((blob.circularity - PI / 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_tiny_shapes() {
        let mut two = GrayImage::new(10, 10);
        fill_rect(&mut two, 4, 4, 2, 1);
        let labels_two = label_components(&two).0;
        let contour = trace_outer_contour(&labels_two, 10, 10, 1, (4, 4));
        assert_eq!(contour, vec![(4, 4), (5, 4)]);
        assert_eq!(closed_perimeter(&contour), 2.0);
        assert_eq!(polygon_moments(&contour).0, 0.0);

        let mut square = GrayImage::new(10, 10);
        fill_rect(&mut square, 4, 4, 2, 2);
        let labels = label_components(&square).0;
        let contour = trace_outer_contour(&labels, 10, 10, 1, (4, 4));
        assert_eq!(contour.len(), 4);
        assert_eq!(polygon_moments(&contour).0, 1.0);
        assert_eq!(closed_perimeter(&contour), 4.0);
    }

    #[test]
    fn test_single_pixel_is_skipped_for_zero_perimeter() {
        let mut mask = GrayImage::new(40, 40);
        mask.put_pixel(20, 20, Luma([255]));
        assert!(extract_blobs(&mask, &any_size()).is_empty());
    }

    #[test]
    fn test_disc_is_nearly_circular() {
        let mut mask = GrayImage::new(100, 100);
        fill_disc(&mut mask, 50, 50, 15);
        let blobs = extract_blobs(&mask, &any_size());
        assert_eq!(blobs.len(), 1);
        assert!(blobs[0].circularity > 0.8, "{}", blobs[0].circularity);
        assert!((blobs[0].centroid.0 - 50.0).abs() < 0.5);
        assert!((blobs[0].centroid.1 - 50.0).abs() < 0.5);
    }

    #[test]
    fn test_elongated_blob_has_low_circularity() {
        let mut mask = GrayImage::new(100, 100);
        fill_rect(&mut mask, 20, 45, 60, 6);
        let blobs = extract_blobs(&mask, &any_size());
        assert_eq!(blobs.len(), 1);
        assert!(blobs[0].circularity < 0.4, "{}", blobs[0].circularity);
    }

    #[test]
    fn test_blob_inside_hole_is_not_external() {
        let mut mask = GrayImage::new(60, 60);
        fill_rect(&mut mask, 10, 10, 40, 40);
        // Carve a hole, then put a blob inside it.
        for y in 15..45 {
            for x in 15..45 {
                mask.put_pixel(x, y, Luma([0]));
            }
        }
        fill_rect(&mut mask, 25, 25, 8, 8);

        let blobs = extract_blobs(&mask, &any_size());
        assert_eq!(blobs.len(), 1);
        assert_eq!(blobs[0].bbox.width, 40);
    }

    #[test]
    fn test_area_filter() {
        let mut mask = GrayImage::new(100, 100);
        fill_rect(&mut mask, 20, 20, 5, 5); // area 16
        fill_rect(&mut mask, 50, 50, 20, 20); // area 361
        let filter = BlobFilter {
            min_area: 100.0,
            max_area: 300.0,
            ..any_size()
        };
        assert!(extract_blobs(&mask, &filter).is_empty());

        let filter = BlobFilter {
            min_area: 100.0,
            max_area: 50_000.0,
            ..any_size()
        };
        let blobs = extract_blobs(&mask, &filter);
        assert_eq!(blobs.len(), 1);
        assert_eq!(blobs[0].area, 361.0);
    }

    #[test]
    fn test_diagonal_pixels_join_one_component() {
        let mut mask = GrayImage::new(20, 20);
        fill_rect(&mut mask, 5, 5, 3, 3);
        fill_rect(&mut mask, 8, 8, 3, 3);
        let (_, components) = label_components(&mask);
        assert_eq!(components.len(), 1);
    }

    #[test]
    fn test_edge_margin_rules() {
        let filter = any_size();
        // 5% of 480 = 24 > 12.
        assert_eq!(filter.edge_margin(640, 480), 24.0);
        // Minimum of 12 px wins on small frames.
        assert_eq!(filter.edge_margin(100, 100), 12.0);
        // Capped below half the smaller dimension.
        assert_eq!(filter.edge_margin(20, 20), 9.0);
    }

    #[test]
    fn test_edge_flag_flips_at_margin() {
        let filter = any_size();
        let (w, h) = (200, 200);
        let touching = BoundingBox {
            x: 11,
            y: 50,
            width: 20,
            height: 20,
        };
        let clear = BoundingBox { x: 12, ..touching };
        assert!(filter.is_edge(&touching, w, h));
        assert!(!filter.is_edge(&clear, w, h));

        let right = BoundingBox {
            x: 200 - 12 - 20,
            ..touching
        };
        assert!(!filter.is_edge(&right, w, h));
        let right_over = BoundingBox {
            x: 200 - 12 - 19,
            ..touching
        };
        assert!(filter.is_edge(&right_over, w, h));
    }

    #[test]
    fn test_edge_ignore_drops_edge_blobs() {
        let mut mask = GrayImage::new(200, 200);
        fill_rect(&mut mask, 2, 80, 15, 15);
        fill_rect(&mut mask, 90, 90, 15, 15);

        let flagged = extract_blobs(&mask, &any_size());
        assert_eq!(flagged.len(), 2);
        assert!(flagged[0].edge_reflection || flagged[1].edge_reflection);

        let ignoring = BlobFilter {
            edge_ignore: true,
            ..any_size()
        };
        let kept = extract_blobs(&mask, &ignoring);
        assert_eq!(kept.len(), 1);
        assert!(!kept[0].edge_reflection);
        assert_eq!(kept[0].bbox.x, 90);
    }
}
