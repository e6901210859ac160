// src/motion/consensus.rs - Reduce a burst of position samples to one value
//
// The two closest samples are trusted and averaged; the rest are treated as
// possible glitches.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Consensus {
    pub value: f64,
    /// Sample farthest from the consensus, when more than two were taken.
    pub outlier: Option<f64>,
}

impl Consensus {
    pub fn outlier_delta(&self) -> f64 {
        self.outlier.map(|o| (o - self.value).abs()).unwrap_or(0.0)
    }
}

pub fn consensus(samples: &[f64]) -> Option<Consensus> {
    match samples {
        [] => None,
        [only] => Some(Consensus {
            value: *only,
            outlier: None,
        }),
        [a, b] => Some(Consensus {
            value: (a + b) / 2.0,
            outlier: None,
        }),
        _ => {
            let mut best = (0, 1);
            let mut best_gap = f64::INFINITY;
            for i in 0..samples.len() {
                for j in (i + 1)..samples.len() {
                    let gap = (samples[i] - samples[j]).abs();
                    if gap < best_gap {
                        best_gap = gap;
                        best = (i, j);
                    }
                }
            }
            let value = (samples[best.0] + samples[best.1]) / 2.0;
            let outlier = samples
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != best.0 && *i != best.1)
                .map(|(_, v)| *v)
                .max_by(|a, b| (a - value).abs().total_cmp(&(b - value).abs()));
            Some(Consensus { value, outlier })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closest_pair_wins() {
        let c = consensus(&[10.0, 10.2, 50.0]).unwrap();
        assert!((c.value - 10.1).abs() < 1e-9);
        assert_eq!(c.outlier, Some(50.0));
        assert!((c.outlier_delta() - 39.9).abs() < 1e-9);
    }

    #[test]
    fn test_outlier_first() {
        let c = consensus(&[0.0, 42.0, 42.4]).unwrap();
        assert!((c.value - 42.2).abs() < 1e-9);
    }

    #[test]
    fn test_small_inputs() {
        assert_eq!(consensus(&[]), None);
        assert_eq!(consensus(&[7.0]).unwrap().value, 7.0);
        assert_eq!(consensus(&[7.0, 8.0]).unwrap().value, 7.5);
    }
}
