// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Piecewise-linear bandwidth functions.
//!
//! A bandwidth function is a monotonically non-decreasing map from an abstract
//! *fair share* (`x`) to a bandwidth in bits/s (`y`). Between vertices the
//! function is linearly interpolated; two consecutive vertices with the same
//! `x` encode a step. Queries past the configured range answer with [`INF`],
//! which keeps the `min()` algebra of the tenant transformation loop free of
//! sentinel special cases.

use core::{fmt, str::FromStr};

/// Returned when no vertex lies above the query.
pub const INF: f64 = f64::INFINITY;

/// Absolute tolerance for comparing vertex coordinates.
pub const FP_TOLERANCE: f64 = 1e-3;

#[derive(Clone, Debug, PartialEq)]
pub struct BandwidthFunction {
    // invariant: non-empty, `y` non-decreasing
    vertices: Vec<(f64, f64)>,
}

impl Default for BandwidthFunction {
    fn default() -> Self {
        Self::new()
    }
}

impl BandwidthFunction {
    /// Creates a function with the origin vertex `(0, 0)`
    pub fn new() -> Self {
        Self {
            vertices: vec![(0.0, 0.0)],
        }
    }

    /// Appends a vertex at the tail.
    ///
    /// Returns `false` (leaving the function unchanged) if the vertex would
    /// break the bandwidth monotonicity.
    pub fn add_vertex(&mut self, fair_share: f64, bandwidth: f64) -> bool {
        if let Some(&(_, last_bw)) = self.vertices.last() {
            if bandwidth < last_bw {
                return false;
            }
        }
        self.vertices.push((fair_share, bandwidth));
        true
    }

    pub fn vertices(&self) -> &[(f64, f64)] {
        &self.vertices
    }

    /// The last configured vertex
    pub fn last_vertex(&self) -> (f64, f64) {
        *self
            .vertices
            .last()
            .expect("a bandwidth function is never empty")
    }

    /// Maps a fair share to the bandwidth it entitles.
    ///
    /// `INF` answers with the upper bound; queries past the last vertex
    /// saturate at the last bandwidth. Where two vertices share the queried
    /// `x`, the higher (second) one wins.
    pub fn bandwidth(&self, fair_share: f64) -> f64 {
        if fair_share == INF {
            return self.last_vertex().1;
        }

        for (i, &(x, y)) in self.vertices.iter().enumerate() {
            if x == fair_share {
                return match self.vertices.get(i + 1) {
                    Some(&(next_x, next_y)) if next_x == x => next_y,
                    _ => y,
                };
            }

            match self.vertices.get(i + 1) {
                Some(&(next_x, next_y)) if fair_share < next_x => {
                    return y + ((fair_share - x) / (next_x - x)) * (next_y - y);
                }
                Some(_) => {}
                None => return y,
            }
        }

        0.0
    }

    /// Maps a bandwidth to the smallest fair share that reaches it.
    ///
    /// Returns `INF` when the bandwidth exceeds the last vertex.
    pub fn fair_share(&self, bandwidth: f64) -> f64 {
        if bandwidth == INF {
            return INF;
        }

        for (i, &(x, y)) in self.vertices.iter().enumerate() {
            if y == bandwidth {
                // the first match is the smallest fair share
                return x;
            }

            match self.vertices.get(i + 1) {
                Some(&(next_x, next_y)) if bandwidth < next_y => {
                    return x + ((bandwidth - y) / (next_y - y)) * (next_x - x);
                }
                Some(_) => {}
                None => return INF,
            }
        }

        0.0
    }

    /// The smallest vertex fair share strictly above the argument, or `INF`
    pub fn next_vertex_by_fs(&self, fair_share: f64) -> f64 {
        for &(x, _) in &self.vertices {
            if x > fair_share {
                return x;
            }
        }
        INF
    }

    /// The smallest vertex bandwidth strictly above the argument, or `INF`
    pub fn next_vertex_by_bw(&self, bandwidth: f64) -> f64 {
        for &(_, y) in &self.vertices {
            if y > bandwidth {
                return y;
            }
        }
        INF
    }
}

impl fmt::Display for BandwidthFunction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, (x, y)) in self.vertices.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{x},{y}")?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseBfError;

impl fmt::Display for ParseBfError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "invalid bandwidth function (expected `fs,bw` pairs with non-decreasing bandwidth)"
        )
    }
}

impl std::error::Error for ParseBfError {}

impl FromStr for BandwidthFunction {
    type Err = ParseBfError;

    /// Parses the configuration form `fs1,bw1 fs2,bw2 ...`.
    ///
    /// The vertex list is taken verbatim (the origin is expected to be
    /// spelled out), so parse-then-print round-trips exactly.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut vertices = Vec::new();
        for pair in s.split_whitespace() {
            let (fs, bw) = pair.split_once(',').ok_or(ParseBfError)?;
            let fs: f64 = fs.parse().map_err(|_| ParseBfError)?;
            let bw: f64 = bw.parse().map_err(|_| ParseBfError)?;
            if !fs.is_finite() || !bw.is_finite() {
                return Err(ParseBfError);
            }
            if let Some(&(_, last_bw)) = vertices.last() {
                if bw < last_bw {
                    return Err(ParseBfError);
                }
            }
            vertices.push((fs, bw));
        }

        if vertices.is_empty() {
            return Err(ParseBfError);
        }

        Ok(Self { vertices })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bf(s: &str) -> BandwidthFunction {
        s.parse().unwrap()
    }

    #[test]
    fn forward_interpolation() {
        let f = bf("0,0 10,1000");

        assert_eq!(f.bandwidth(0.0), 0.0);
        assert_eq!(f.bandwidth(5.0), 500.0);
        assert_eq!(f.bandwidth(10.0), 1000.0);
        // beyond the last vertex the function is flat
        assert_eq!(f.bandwidth(25.0), 1000.0);
        assert_eq!(f.bandwidth(INF), 1000.0);
    }

    #[test]
    fn duplicate_x_encodes_a_step() {
        let f = bf("0,0 5,100 5,300 10,400");

        // the second of the duplicated vertices wins
        assert_eq!(f.bandwidth(5.0), 300.0);
        assert_eq!(f.bandwidth(4.0), 80.0);
        assert_eq!(f.bandwidth(7.5), 350.0);
    }

    #[test]
    fn inverse_interpolation() {
        let f = bf("0,0 10,1000");

        assert_eq!(f.fair_share(0.0), 0.0);
        assert_eq!(f.fair_share(500.0), 5.0);
        assert_eq!(f.fair_share(1000.0), 10.0);
        assert_eq!(f.fair_share(1000.1), INF);
        assert_eq!(f.fair_share(INF), INF);
    }

    #[test]
    fn duplicate_y_collapses_to_the_smaller_fair_share() {
        let f = bf("0,0 2,100 6,100 10,500");

        assert_eq!(f.fair_share(100.0), 2.0);
        assert_eq!(f.fair_share(300.0), 8.0);
    }

    #[test]
    fn next_vertex_queries() {
        let f = bf("0,0 2,100 6,100 10,500");

        assert_eq!(f.next_vertex_by_fs(0.0), 2.0);
        assert_eq!(f.next_vertex_by_fs(2.0), 6.0);
        assert_eq!(f.next_vertex_by_fs(10.0), INF);

        assert_eq!(f.next_vertex_by_bw(0.0), 100.0);
        assert_eq!(f.next_vertex_by_bw(100.0), 500.0);
        assert_eq!(f.next_vertex_by_bw(500.0), INF);
    }

    #[test]
    fn add_vertex_rejects_decreasing_bandwidth() {
        let mut f = BandwidthFunction::new();

        assert!(f.add_vertex(5.0, 100.0));
        assert!(!f.add_vertex(6.0, 99.0));
        assert_eq!(f.vertices(), [(0.0, 0.0), (5.0, 100.0)]);
    }

    #[test]
    fn parse_round_trip() {
        let input = "0,0 2,100 6,100 10,500";
        let f = bf(input);
        assert_eq!(f.to_string(), input);
        assert_eq!(bf(&f.to_string()), f);
    }

    #[test]
    fn parse_rejects_malformed_input() {
        assert!("".parse::<BandwidthFunction>().is_err());
        assert!("1".parse::<BandwidthFunction>().is_err());
        assert!("a,b".parse::<BandwidthFunction>().is_err());
        assert!("0,0 1,100 2,50".parse::<BandwidthFunction>().is_err());
    }

    /// For any accepted vertex sequence the function keeps a non-decreasing
    /// bandwidth column and both lookups respect that ordering.
    #[test]
    fn vertex_consistency() {
        bolero::check!()
            .with_type::<Vec<(u16, u16)>>()
            .for_each(|points| {
                let mut points = points.clone();
                points.sort_unstable();

                let mut f = BandwidthFunction::new();
                for (x, y) in points {
                    f.add_vertex(x as f64, y as f64);
                }

                let mut last_bw = f64::MIN;
                for &(_, y) in f.vertices() {
                    assert!(y >= last_bw);
                    last_bw = y;
                }

                // forward lookups are monotone in the fair share
                let top = f.last_vertex().0;
                let mut last = f.bandwidth(0.0);
                for step in 1..=8 {
                    let fs = top * step as f64 / 8.0;
                    let bw = f.bandwidth(fs);
                    assert!(bw >= last);
                    // the inverse answers with the smallest fair share that
                    // reaches the bandwidth
                    let inv = f.fair_share(bw);
                    assert!(inv <= fs || (inv - fs).abs() < FP_TOLERANCE);
                    last = bw;
                }
            });
    }
}
