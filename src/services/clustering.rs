use crate::models::correlation::ClusterResult;

/// Group symbols whose pairwise correlation reaches the threshold.
///
/// Seed expansion over the correlation matrix: each unassigned symbol
/// seeds a cluster and pulls in every other unassigned symbol correlated
/// with it at or above the threshold. Only clusters with two or more
/// members are reported; NaN cells (pairs that failed the minimum
/// observation count) never link symbols.
pub fn threshold_clusters(
    symbols: &[String],
    matrix: &[Vec<f64>],
    threshold: f64,
) -> Vec<ClusterResult> {
    let n = symbols.len();
    if n < 2 {
        return Vec::new();
    }

    let mut assignments: Vec<Option<usize>> = vec![None; n];
    let mut next_cluster = 0usize;

    for seed in 0..n {
        if assignments[seed].is_some() {
            continue;
        }
        assignments[seed] = Some(next_cluster);

        for other in 0..n {
            if seed == other || assignments[other].is_some() {
                continue;
            }
            let rho = matrix[seed][other];
            if rho.is_finite() && rho >= threshold {
                assignments[other] = Some(next_cluster);
            }
        }
        next_cluster += 1;
    }

    let mut clusters = Vec::new();
    for cluster_id in 0..next_cluster {
        let members: Vec<usize> = (0..n)
            .filter(|&i| assignments[i] == Some(cluster_id))
            .collect();
        if members.len() < 2 {
            continue;
        }

        let mut sum = 0.0;
        let mut count = 0usize;
        for (a, &i) in members.iter().enumerate() {
            for &j in members.iter().skip(a + 1) {
                let rho = matrix[i][j];
                if rho.is_finite() {
                    sum += rho;
                    count += 1;
                }
            }
        }

        let label = (b'A' + (clusters.len() as u8 % 26)) as char;
        clusters.push(ClusterResult {
            label: format!("Cluster {}", label),
            symbols: members.iter().map(|&i| symbols[i].clone()).collect(),
            avg_intra_correlation: if count > 0 { sum / count as f64 } else { 0.0 },
        });
    }

    clusters
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symbols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_two_distinct_groups() {
        // AAPL/MSFT tightly linked, GLD/SLV tightly linked, cross pairs low
        let syms = symbols(&["AAPL", "MSFT", "GLD", "SLV"]);
        let matrix = vec![
            vec![1.0, 0.9, 0.1, 0.2],
            vec![0.9, 1.0, 0.15, 0.1],
            vec![0.1, 0.15, 1.0, 0.85],
            vec![0.2, 0.1, 0.85, 1.0],
        ];

        let clusters = threshold_clusters(&syms, &matrix, 0.7);
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].symbols, vec!["AAPL", "MSFT"]);
        assert_eq!(clusters[1].symbols, vec!["GLD", "SLV"]);
        assert!((clusters[0].avg_intra_correlation - 0.9).abs() < 1e-12);
    }

    #[test]
    fn test_singletons_are_dropped() {
        let syms = symbols(&["A", "B", "C"]);
        let matrix = vec![
            vec![1.0, 0.8, 0.1],
            vec![0.8, 1.0, 0.2],
            vec![0.1, 0.2, 1.0],
        ];
        let clusters = threshold_clusters(&syms, &matrix, 0.7);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].symbols, vec!["A", "B"]);
    }

    #[test]
    fn test_nan_cells_never_link() {
        let syms = symbols(&["A", "B"]);
        let matrix = vec![vec![1.0, f64::NAN], vec![f64::NAN, 1.0]];
        assert!(threshold_clusters(&syms, &matrix, 0.7).is_empty());
    }

    #[test]
    fn test_single_symbol_no_clusters() {
        let syms = symbols(&["A"]);
        assert!(threshold_clusters(&syms, &[vec![1.0]], 0.7).is_empty());
    }
}
