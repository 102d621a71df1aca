//! Geometry primitives shared by detection and the processor: points,
//! oriented boxes, convex hull, minimum-area rectangle, polygon offset
//! ("unclip"), and perspective transform solve/sample.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Point { x, y }
    }
}

/// Oriented quadrilateral, always stored clockwise from its top-left corner.
#[derive(Debug, Clone, PartialEq)]
pub struct TextBox {
    points: [Point; 4],
}

impl TextBox {
    /// Builds a box from any 4 points, restoring the clockwise-from-top-left
    /// invariant. Returns `None` if `points` does not have exactly 4 entries.
    pub fn new(points: &[Point]) -> Option<Self> {
        if points.len() != 4 {
            return None;
        }
        let ordered = order_points_clockwise(points);
        let mut arr = [Point::new(0.0, 0.0); 4];
        arr.copy_from_slice(&ordered);
        Some(TextBox { points: arr })
    }

    pub fn points(&self) -> &[Point; 4] {
        &self.points
    }

    pub fn bounding_rect(&self) -> Rect {
        let xs = self.points.iter().map(|p| p.x);
        let ys = self.points.iter().map(|p| p.y);
        Rect {
            left: xs.clone().fold(f64::INFINITY, f64::min),
            right: xs.fold(f64::NEG_INFINITY, f64::max),
            top: ys.clone().fold(f64::INFINITY, f64::min),
            bottom: ys.fold(f64::NEG_INFINITY, f64::max),
        }
    }

    /// Lengths of the top, right, bottom, left edges in that order.
    pub fn edge_lengths(&self) -> [f64; 4] {
        let p = &self.points;
        [
            dist(p[0], p[1]),
            dist(p[1], p[2]),
            dist(p[2], p[3]),
            dist(p[3], p[0]),
        ]
    }

    /// Axis-aligned bounding rect expanded by `border` pixels on every
    /// side and clamped to `[0, width] x [0, height]`. Legacy fallback for
    /// callers that want a simple rectangular crop instead of the
    /// perspective-warp crop `OcrProcessor` uses by default.
    pub fn expand_axis_aligned(&self, border: f64, width: u32, height: u32) -> Rect {
        let r = self.bounding_rect();
        Rect {
            left: (r.left - border).clamp(0.0, width as f64),
            top: (r.top - border).clamp(0.0, height as f64),
            right: (r.right + border).clamp(0.0, width as f64),
            bottom: (r.bottom + border).clamp(0.0, height as f64),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

fn dist(a: Point, b: Point) -> f64 {
    ((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt()
}

/// Orders arbitrary points clockwise starting from the top-left corner.
/// Inputs whose length is not 4 are returned unchanged.
pub fn order_points_clockwise(points: &[Point]) -> Vec<Point> {
    if points.len() != 4 {
        return points.to_vec();
    }

    let cx = points.iter().map(|p| p.x).sum::<f64>() / points.len() as f64;
    let cy = points.iter().map(|p| p.y).sum::<f64>() / points.len() as f64;

    let mut sorted: Vec<Point> = points.to_vec();
    sorted.sort_by(|a, b| {
        let angle_a = (a.y - cy).atan2(a.x - cx);
        let angle_b = (b.y - cy).atan2(b.x - cx);
        angle_a.partial_cmp(&angle_b).unwrap_or(std::cmp::Ordering::Equal)
    });

    let top_left_idx = sorted
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| (a.x + a.y).partial_cmp(&(b.x + b.y)).unwrap())
        .map(|(i, _)| i)
        .unwrap_or(0);

    sorted.rotate_left(top_left_idx);
    sorted
}

/// Solves the 8-unknown homography mapping `src[i] -> dst[i]` for all 4
/// correspondences via Gaussian elimination with partial pivoting on an
/// 8x9 augmented matrix. Returns `[a,b,c,d,e,f,g,h]`.
pub fn compute_perspective_transform(src: &[Point; 4], dst: &[Point; 4]) -> Option<[f64; 8]> {
    let mut a = [[0.0_f64; 9]; 8];
    for i in 0..4 {
        let (x, y) = (src[i].x, src[i].y);
        let (u, v) = (dst[i].x, dst[i].y);
        a[2 * i] = [x, y, 1.0, 0.0, 0.0, 0.0, -x * u, -y * u, u];
        a[2 * i + 1] = [0.0, 0.0, 0.0, x, y, 1.0, -x * v, -y * v, v];
    }

    for col in 0..8 {
        let pivot = (col..8)
            .max_by(|&r1, &r2| a[r1][col].abs().partial_cmp(&a[r2][col].abs()).unwrap())?;
        if a[pivot][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot);
        for row in 0..8 {
            if row == col {
                continue;
            }
            let factor = a[row][col] / a[col][col];
            for c in col..9 {
                a[row][c] -= factor * a[col][c];
            }
        }
    }

    let mut coeffs = [0.0_f64; 8];
    for i in 0..8 {
        coeffs[i] = a[i][8] / a[i][i];
    }
    Some(coeffs)
}

/// Samples `src` (RGBA, `src_w`x`src_h`) through the inverse of the
/// homography `src_pts -> dst_pts` into a new `w`x`h` RGBA buffer.
/// Bilinear sampling is used where all 4 neighbors are in-bounds; the
/// nearest in-bounds pixel is used at the edge; out-of-bounds samples are
/// written as fully transparent.
pub fn perspective_transform(
    src: &[u8],
    src_w: u32,
    src_h: u32,
    src_pts: &[Point; 4],
    dst_pts: &[Point; 4],
    w: u32,
    h: u32,
) -> Option<Vec<u8>> {
    // Forward: dst -> src, so invert the dst->src roles from the solver's
    // perspective: solve src_pts -> dst_pts, then invert per-point below by
    // solving dst_pts -> src_pts directly (avoids a 3x3 matrix inverse).
    let coeffs = compute_perspective_transform(dst_pts, src_pts)?;
    let [a, b, c, d, e, f, g, hh] = coeffs;

    let mut out = vec![0u8; (w * h * 4) as usize];
    for y in 0..h {
        for x in 0..w {
            let fx = x as f64 + 0.5;
            let fy = y as f64 + 0.5;
            let denom = g * fx + hh * fy + 1.0;
            if denom.abs() < 1e-12 {
                continue;
            }
            let sx = (a * fx + b * fy + c) / denom;
            let sy = (d * fx + e * fy + f) / denom;

            let pixel = sample_bilinear(src, src_w, src_h, sx, sy);
            let idx = ((y * w + x) * 4) as usize;
            if let Some(p) = pixel {
                out[idx..idx + 4].copy_from_slice(&p);
            }
        }
    }
    Some(out)
}

fn sample_bilinear(src: &[u8], w: u32, h: u32, x: f64, y: f64) -> Option<[u8; 4]> {
    if x < -1.0 || y < -1.0 || x > w as f64 || y > h as f64 {
        return None;
    }
    let x0 = x.floor();
    let y0 = y.floor();
    let x1 = x0 + 1.0;
    let y1 = y0 + 1.0;

    let in_bounds = |px: f64, py: f64| px >= 0.0 && py >= 0.0 && px < w as f64 && py < h as f64;

    if in_bounds(x0, y0) && in_bounds(x1, y0) && in_bounds(x0, y1) && in_bounds(x1, y1) {
        let get = |px: f64, py: f64| pixel_at(src, w, px as u32, py as u32);
        let tx = x - x0;
        let ty = y - y0;
        let p00 = get(x0, y0);
        let p10 = get(x1, y0);
        let p01 = get(x0, y1);
        let p11 = get(x1, y1);
        let mut out = [0u8; 4];
        for c in 0..4 {
            let top = p00[c] as f64 * (1.0 - tx) + p10[c] as f64 * tx;
            let bot = p01[c] as f64 * (1.0 - tx) + p11[c] as f64 * tx;
            out[c] = (top * (1.0 - ty) + bot * ty).round().clamp(0.0, 255.0) as u8;
        }
        Some(out)
    } else {
        let nx = (x.round() as i64).clamp(0, w as i64 - 1) as u32;
        let ny = (y.round() as i64).clamp(0, h as i64 - 1) as u32;
        Some(pixel_at(src, w, nx, ny))
    }
}

fn pixel_at(src: &[u8], w: u32, x: u32, y: u32) -> [u8; 4] {
    let idx = ((y * w + x) * 4) as usize;
    [src[idx], src[idx + 1], src[idx + 2], src[idx + 3]]
}

/// Monotone-chain convex hull. Input need not be pre-sorted. Fewer than 3
/// points are returned unchanged.
pub fn convex_hull(points: &[Point]) -> Vec<Point> {
    if points.len() < 3 {
        return points.to_vec();
    }

    let mut pts = points.to_vec();
    pts.sort_by(|a, b| {
        a.x.partial_cmp(&b.x)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.y.partial_cmp(&b.y).unwrap_or(std::cmp::Ordering::Equal))
    });
    pts.dedup_by(|a, b| (a.x - b.x).abs() < 1e-9 && (a.y - b.y).abs() < 1e-9);
    if pts.len() < 3 {
        return pts;
    }

    let cross = |o: Point, a: Point, b: Point| (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x);

    let mut lower: Vec<Point> = Vec::new();
    for &p in &pts {
        while lower.len() >= 2 && cross(lower[lower.len() - 2], lower[lower.len() - 1], p) <= 0.0 {
            lower.pop();
        }
        lower.push(p);
    }

    let mut upper: Vec<Point> = Vec::new();
    for &p in pts.iter().rev() {
        while upper.len() >= 2 && cross(upper[upper.len() - 2], upper[upper.len() - 1], p) <= 0.0 {
            upper.pop();
        }
        upper.push(p);
    }

    lower.pop();
    upper.pop();
    lower.extend(upper);
    lower
}

/// Minimum-area bounding rectangle, returned as its 4 corners. When
/// `points_are_convex` is false the convex hull is computed first. Falls
/// back to the axis-aligned bounding box if no hull edge yields a
/// rectangle with both sides exceeding 1e-3.
pub fn minimum_area_rectangle(points: &[Point], points_are_convex: bool) -> Vec<Point> {
    let hull = if points_are_convex {
        points.to_vec()
    } else {
        convex_hull(points)
    };
    if hull.len() < 3 {
        return axis_aligned_bbox(points);
    }

    let mut best: Option<(f64, [Point; 4])> = None;
    let n = hull.len();
    for i in 0..n {
        let p1 = hull[i];
        let p2 = hull[(i + 1) % n];
        let edge = Point::new(p2.x - p1.x, p2.y - p1.y);
        let edge_len = (edge.x * edge.x + edge.y * edge.y).sqrt();
        if edge_len < 1e-12 {
            continue;
        }
        let ux = edge.x / edge_len;
        let uy = edge.y / edge_len;
        // Normal direction (perpendicular, unit length).
        let nx = -uy;
        let ny = ux;

        let mut min_u = f64::INFINITY;
        let mut max_u = f64::NEG_INFINITY;
        let mut min_v = f64::INFINITY;
        let mut max_v = f64::NEG_INFINITY;
        for &p in &hull {
            let rx = p.x - p1.x;
            let ry = p.y - p1.y;
            let u = rx * ux + ry * uy;
            let v = rx * nx + ry * ny;
            min_u = min_u.min(u);
            max_u = max_u.max(u);
            min_v = min_v.min(v);
            max_v = max_v.max(v);
        }

        let width = max_u - min_u;
        let height = max_v - min_v;
        if width <= 1e-3 || height <= 1e-3 {
            continue;
        }
        let area = width * height;

        if best.as_ref().map(|(a, _)| area < *a).unwrap_or(true) {
            let corner = |u: f64, v: f64| Point::new(p1.x + u * ux + v * nx, p1.y + u * uy + v * ny);
            let rect = [
                corner(min_u, min_v),
                corner(max_u, min_v),
                corner(max_u, max_v),
                corner(min_u, max_v),
            ];
            best = Some((area, rect));
        }
    }

    match best {
        Some((_, rect)) => rect.to_vec(),
        None => axis_aligned_bbox(points),
    }
}

fn axis_aligned_bbox(points: &[Point]) -> Vec<Point> {
    if points.is_empty() {
        return Vec::new();
    }
    let left = points.iter().map(|p| p.x).fold(f64::INFINITY, f64::min);
    let right = points.iter().map(|p| p.x).fold(f64::NEG_INFINITY, f64::max);
    let top = points.iter().map(|p| p.y).fold(f64::INFINITY, f64::min);
    let bottom = points.iter().map(|p| p.y).fold(f64::NEG_INFINITY, f64::max);
    vec![
        Point::new(left, top),
        Point::new(right, top),
        Point::new(right, bottom),
        Point::new(left, bottom),
    ]
}

/// Signed polygon area via the shoelace formula (positive for clockwise
/// winding in an image coordinate system where y grows downward).
pub fn signed_polygon_area(points: &[Point]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut area = 0.0;
    for i in 0..points.len() {
        let a = points[i];
        let b = points[(i + 1) % points.len()];
        area += (b.x - a.x) * (b.y + a.y);
    }
    area / 2.0
}

pub fn perimeter(points: &[Point]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }
    let mut total = 0.0;
    for i in 0..points.len() {
        total += dist(points[i], points[(i + 1) % points.len()]);
    }
    total
}

/// Clipper-style outward polygon offset: for each vertex, move along the
/// outward normal (sign chosen from the polygon's winding) by `offset`
/// pixels, then intersect the two adjacent offset edges. Parallel edges
/// degrade to the offset vertex itself.
pub fn offset_polygon(polygon: &[Point], offset: f64) -> Vec<Point> {
    let n = polygon.len();
    if n < 3 || offset == 0.0 {
        return polygon.to_vec();
    }

    let area_sign = if signed_polygon_area(polygon) >= 0.0 { 1.0 } else { -1.0 };

    let edge_normal = |a: Point, b: Point| -> (f64, f64) {
        let dx = b.x - a.x;
        let dy = b.y - a.y;
        let len = (dx * dx + dy * dy).sqrt();
        if len < 1e-12 {
            (0.0, 0.0)
        } else {
            // Outward normal for a clockwise polygon in image coordinates.
            (area_sign * dy / len, -area_sign * dx / len)
        }
    };

    let mut result = Vec::with_capacity(n);
    for i in 0..n {
        let prev = polygon[(i + n - 1) % n];
        let curr = polygon[i];
        let next = polygon[(i + 1) % n];

        let (n1x, n1y) = edge_normal(prev, curr);
        let (n2x, n2y) = edge_normal(curr, next);

        let a1 = Point::new(prev.x + n1x * offset, prev.y + n1y * offset);
        let b1 = Point::new(curr.x + n1x * offset, curr.y + n1y * offset);
        let a2 = Point::new(curr.x + n2x * offset, curr.y + n2y * offset);
        let b2 = Point::new(next.x + n2x * offset, next.y + n2y * offset);

        match line_intersect(a1, b1, a2, b2) {
            Some(p) => result.push(p),
            None => result.push(Point::new(curr.x + n1x * offset, curr.y + n1y * offset)),
        }
    }
    result
}

fn line_intersect(a1: Point, a2: Point, b1: Point, b2: Point) -> Option<Point> {
    let d1x = a2.x - a1.x;
    let d1y = a2.y - a1.y;
    let d2x = b2.x - b1.x;
    let d2y = b2.y - b1.y;

    let denom = d1x * d2y - d1y * d2x;
    if denom.abs() < 1e-9 {
        return None;
    }
    let t = ((b1.x - a1.x) * d2y - (b1.y - a1.y) * d2x) / denom;
    Some(Point::new(a1.x + t * d1x, a1.y + t * d1y))
}

/// Expands `points` outward by `offset = |area| * ratio / perimeter`.
/// Returns empty if perimeter is zero, the box unchanged if the computed
/// offset is zero or negative.
pub fn unclip_box(points: &[Point], ratio: f64) -> Vec<Point> {
    let per = perimeter(points);
    if per <= 1e-9 {
        return Vec::new();
    }
    let area = signed_polygon_area(points).abs();
    let offset = area * ratio / per;
    if offset <= 0.0 {
        return points.to_vec();
    }
    offset_polygon(points, offset)
}

/// True if `(x, y)` lies inside (or on the boundary of) the convex quad,
/// decided by checking the edge-crossing sign never flips.
pub fn is_point_inside_quad(x: f64, y: f64, quad: &[Point; 4]) -> bool {
    let mut sign = 0.0_f64;
    for i in 0..4 {
        let a = quad[i];
        let b = quad[(i + 1) % 4];
        let cross = (b.x - a.x) * (y - a.y) - (b.y - a.y) * (x - a.x);
        if cross.abs() < 1e-9 {
            continue;
        }
        if sign == 0.0 {
            sign = cross.signum();
        } else if cross.signum() != sign {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_points_clockwise_picks_top_left_first() {
        let pts = [
            Point::new(10.0, 0.0),
            Point::new(0.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(0.0, 10.0),
        ];
        let ordered = order_points_clockwise(&pts);
        assert_eq!(ordered.len(), 4);
        let min_sum = ordered
            .iter()
            .map(|p| p.x + p.y)
            .fold(f64::INFINITY, f64::min);
        assert_eq!(ordered[0].x + ordered[0].y, min_sum);
        assert!(signed_polygon_area(&ordered) > 0.0);
    }

    #[test]
    fn order_points_clockwise_passes_through_wrong_length() {
        let pts = [Point::new(0.0, 0.0), Point::new(1.0, 1.0), Point::new(2.0, 2.0)];
        assert_eq!(order_points_clockwise(&pts).len(), 3);
    }

    #[test]
    fn perspective_round_trip_recovers_points() {
        let src = [
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(0.0, 10.0),
        ];
        let dst = [
            Point::new(1.0, 2.0),
            Point::new(20.0, 3.0),
            Point::new(18.0, 25.0),
            Point::new(2.0, 22.0),
        ];
        let forward = compute_perspective_transform(&src, &dst).unwrap();
        let backward = compute_perspective_transform(&dst, &src).unwrap();

        for &p in &src {
            let denom = forward[6] * p.x + forward[7] * p.y + 1.0;
            let u = (forward[0] * p.x + forward[1] * p.y + forward[2]) / denom;
            let v = (forward[3] * p.x + forward[4] * p.y + forward[5]) / denom;

            let denom2 = backward[6] * u + backward[7] * v + 1.0;
            let rx = (backward[0] * u + backward[1] * v + backward[2]) / denom2;
            let ry = (backward[3] * u + backward[4] * v + backward[5]) / denom2;

            assert!((rx - p.x).abs() < 1e-6, "x mismatch: {} vs {}", rx, p.x);
            assert!((ry - p.y).abs() < 1e-6, "y mismatch: {} vs {}", ry, p.y);
        }
    }

    #[test]
    fn convex_hull_contains_all_points() {
        let pts = vec![
            Point::new(0.0, 0.0),
            Point::new(4.0, 0.0),
            Point::new(4.0, 4.0),
            Point::new(0.0, 4.0),
            Point::new(2.0, 2.0), // interior point
        ];
        let hull = convex_hull(&pts);
        assert_eq!(hull.len(), 4);
        assert!(!hull.contains(&Point::new(2.0, 2.0)));
    }

    #[test]
    fn convex_hull_passes_through_small_inputs() {
        let pts = vec![Point::new(0.0, 0.0), Point::new(1.0, 1.0)];
        assert_eq!(convex_hull(&pts), pts);
    }

    #[test]
    fn minimum_area_rectangle_matches_axis_aligned_square() {
        let pts = vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 5.0),
            Point::new(0.0, 5.0),
        ];
        let rect = minimum_area_rectangle(&pts, true);
        assert_eq!(rect.len(), 4);
        let area: f64 = {
            let w = dist(rect[0], rect[1]);
            let h = dist(rect[1], rect[2]);
            w * h
        };
        assert!((area - 50.0).abs() < 1e-6);
    }

    #[test]
    fn unclip_box_expands_area() {
        let pts = vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(0.0, 10.0),
        ];
        let expanded = unclip_box(&pts, 1.5);
        assert!(!expanded.is_empty());
        let original_area = signed_polygon_area(&pts).abs();
        let new_area = signed_polygon_area(&expanded).abs();
        assert!(new_area > original_area);
    }

    #[test]
    fn unclip_box_zero_perimeter_returns_empty() {
        let pts = vec![Point::new(1.0, 1.0); 4];
        assert!(unclip_box(&pts, 1.5).is_empty());
    }

    #[test]
    fn unclip_box_zero_offset_returns_input_unchanged() {
        let pts = vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(0.0, 10.0),
        ];
        assert_eq!(unclip_box(&pts, 0.0), pts);
    }

    #[test]
    fn point_inside_quad_detects_center_and_outside() {
        let quad = [
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(0.0, 10.0),
        ];
        assert!(is_point_inside_quad(5.0, 5.0, &quad));
        assert!(!is_point_inside_quad(50.0, 50.0, &quad));
    }

    #[test]
    fn expand_axis_aligned_clamps_to_image_bounds() {
        let pts = [
            Point::new(2.0, 2.0),
            Point::new(12.0, 2.0),
            Point::new(12.0, 8.0),
            Point::new(2.0, 8.0),
        ];
        let b = TextBox::new(&pts).unwrap();
        let expanded = b.expand_axis_aligned(5.0, 15, 10);
        assert_eq!(expanded.left, 0.0);
        assert_eq!(expanded.top, 0.0);
        assert_eq!(expanded.right, 15.0);
        assert_eq!(expanded.bottom, 10.0);
    }

    #[test]
    fn text_box_bounding_rect_is_consistent() {
        let pts = [
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 5.0),
            Point::new(0.0, 5.0),
        ];
        let b = TextBox::new(&pts).unwrap();
        let r = b.bounding_rect();
        assert!(r.right >= r.left);
        assert!(r.bottom >= r.top);
    }
}
