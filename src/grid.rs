//! Atom-centered quadrature grids.
//!
//! Gauss-Legendre radial shells crossed with coarse Lebedev-class angular
//! rules (6, 14 or 26 points), with Becke partitioning to avoid
//! double-counting overlapping atom grids. The integration engine consumes
//! any `&[GridPoint]`; this module is one producer of them, used by the
//! demonstration driver and the tests.

extern crate nalgebra as na;

use na::Vector3;

/// Radial extent of the atom-centered shells, in bohr.
const R_MAX: f64 = 12.0;

#[derive(Clone, Copy, Debug)]
pub struct GridPoint {
    pub r: Vector3<f64>,
    pub w: f64,
}

/// Largest supported angular rule with at most `n_ang` points (minimum 6).
pub fn angular_order(n_ang: usize) -> usize {
    if n_ang >= 26 {
        26
    } else if n_ang >= 14 {
        14
    } else {
        6
    }
}

/// Unit directions and weights of the selected angular rule; weights sum
/// to 4π.
fn angular_rule(n_ang: usize) -> Vec<(Vector3<f64>, f64)> {
    let four_pi = 4.0 * std::f64::consts::PI;

    let vertices = [
        Vector3::new(1.0, 0.0, 0.0),
        Vector3::new(-1.0, 0.0, 0.0),
        Vector3::new(0.0, 1.0, 0.0),
        Vector3::new(0.0, -1.0, 0.0),
        Vector3::new(0.0, 0.0, 1.0),
        Vector3::new(0.0, 0.0, -1.0),
    ];

    match angular_order(n_ang) {
        6 => vertices.iter().map(|&v| (v, four_pi / 6.0)).collect(),
        14 => {
            let mut pts: Vec<(Vector3<f64>, f64)> = vertices
                .iter()
                .map(|&v| (v, four_pi / 15.0))
                .collect();
            for &(x, y, z) in corner_signs() {
                let c = 1.0 / 3.0_f64.sqrt();
                pts.push((Vector3::new(x * c, y * c, z * c), four_pi * 3.0 / 40.0));
            }
            pts
        }
        _ => {
            let mut pts: Vec<(Vector3<f64>, f64)> = vertices
                .iter()
                .map(|&v| (v, four_pi / 21.0))
                .collect();
            let e = 1.0 / 2.0_f64.sqrt();
            for &(x, y, z) in edge_midpoints() {
                pts.push((Vector3::new(x * e, y * e, z * e), four_pi * 4.0 / 105.0));
            }
            let c = 1.0 / 3.0_f64.sqrt();
            for &(x, y, z) in corner_signs() {
                pts.push((Vector3::new(x * c, y * c, z * c), four_pi * 9.0 / 280.0));
            }
            pts
        }
    }
}

fn corner_signs() -> &'static [(f64, f64, f64)] {
    &[
        (1.0, 1.0, 1.0),
        (1.0, 1.0, -1.0),
        (1.0, -1.0, 1.0),
        (1.0, -1.0, -1.0),
        (-1.0, 1.0, 1.0),
        (-1.0, 1.0, -1.0),
        (-1.0, -1.0, 1.0),
        (-1.0, -1.0, -1.0),
    ]
}

fn edge_midpoints() -> &'static [(f64, f64, f64)] {
    &[
        (1.0, 1.0, 0.0),
        (1.0, -1.0, 0.0),
        (-1.0, 1.0, 0.0),
        (-1.0, -1.0, 0.0),
        (1.0, 0.0, 1.0),
        (1.0, 0.0, -1.0),
        (-1.0, 0.0, 1.0),
        (-1.0, 0.0, -1.0),
        (0.0, 1.0, 1.0),
        (0.0, 1.0, -1.0),
        (0.0, -1.0, 1.0),
        (0.0, -1.0, -1.0),
    ]
}

/// Build an atom-centered grid with Becke partition weights.
///
/// Points are ordered atom-major, then radial shell, then angular direction,
/// so consecutive chunks of `shells x angular-order` points form contiguous
/// radial batches. Requires `n_rad >= 2`.
pub fn build_becke_atom_grid(
    coords: &[Vector3<f64>],
    n_rad: usize,
    n_ang: usize,
) -> Vec<GridPoint> {
    let (r_nodes, r_weights) = gauss_legendre(n_rad, 0.0, R_MAX);
    let ang = angular_rule(n_ang);

    let mut points = Vec::with_capacity(coords.len() * r_nodes.len() * ang.len());
    for (a, ra) in coords.iter().enumerate() {
        for (ri, &r) in r_nodes.iter().enumerate() {
            let wr = r_weights[ri] * r * r; // Jacobian r^2
            for &(dir, wang) in &ang {
                let p = *ra + dir * r;
                let w = wr * wang * becke_weight_for_atom(a, &p, coords);
                points.push(GridPoint { r: p, w });
            }
        }
    }
    points
}

/// Classic Becke partition weight for atom `a` at point `r`.
fn becke_weight_for_atom(a: usize, r: &Vector3<f64>, coords: &[Vector3<f64>]) -> f64 {
    let na = coords.len();
    if na == 1 {
        return 1.0;
    }

    // w_a = prod_{b != a} p_ab, normalized across atoms
    let mut raw = vec![1.0_f64; na];
    for i in 0..na {
        for j in 0..na {
            if i == j {
                continue;
            }
            raw[i] *= step_pair(i, j, r, coords);
        }
    }
    let denom: f64 = raw.iter().sum();
    if denom <= 0.0 || !denom.is_finite() {
        return 0.0;
    }
    raw[a] / denom
}

fn step_pair(i: usize, j: usize, r: &Vector3<f64>, coords: &[Vector3<f64>]) -> f64 {
    let ri = (r - coords[i]).norm();
    let rj = (r - coords[j]).norm();
    let rij = (coords[i] - coords[j]).norm();
    if rij < 1e-12 {
        return 0.5;
    }
    let mut mu = (ri - rj) / rij;
    // Becke's smooth step, iterated three times
    for _ in 0..3 {
        mu = (3.0 * mu - mu * mu * mu) / 2.0;
    }
    0.5 * (1.0 - mu)
}

/// Gauss-Legendre nodes and weights on `[a, b]`.
///
/// Newton iteration on the roots of P_n(x).
fn gauss_legendre(n: usize, a: f64, b: f64) -> (Vec<f64>, Vec<f64>) {
    assert!(n >= 2, "radial order must be at least 2");
    let m = (n + 1) / 2;
    let mut x = vec![0.0_f64; n];
    let mut w = vec![0.0_f64; n];

    let eps = 1e-14;
    let nn = n as f64;
    for i in 0..m {
        let mut z = (std::f64::consts::PI * (i as f64 + 0.75) / (nn + 0.5)).cos();
        loop {
            let (p1, p2) = legendre_pn(n, z);
            let pp = (nn * (z * p1 - p2)) / (z * z - 1.0); // P'_n(z)
            let z1 = z;
            z = z1 - p1 / pp;
            if (z - z1).abs() < eps {
                let xm = 0.5 * (b + a);
                let xl = 0.5 * (b - a);
                x[i] = xm - xl * z;
                x[n - 1 - i] = xm + xl * z;
                let wi = 2.0 * xl / ((1.0 - z * z) * pp * pp);
                w[i] = wi;
                w[n - 1 - i] = wi;
                break;
            }
        }
    }
    (x, w)
}

/// Returns (P_n(z), P_{n-1}(z)).
fn legendre_pn(n: usize, z: f64) -> (f64, f64) {
    let mut p1 = 1.0;
    let mut p2 = 0.0;
    for j in 1..=n {
        let p3 = p2;
        p2 = p1;
        p1 = ((2.0 * j as f64 - 1.0) * z * p2 - (j as f64 - 1.0) * p3) / (j as f64);
    }
    (p1, p2)
}
