//! 分类结果的评价指标。

use crate::error::{Error, Result};
use ndarray::{Array2, ArrayView2};
use std::fmt;

/// 每一行最大值所在的列号。出现相等的最大值时取第一个。
pub fn argmax_rows(x: ArrayView2<f32>) -> Vec<usize> {
    x.rows()
        .into_iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |(bi, bv), (i, &v)| {
                    if v > bv {
                        (i, v)
                    } else {
                        (bi, bv)
                    }
                })
                .0
        })
        .collect()
}

fn check_len(y_true: &[usize], y_pred: &[usize]) -> Result<()> {
    if y_true.len() != y_pred.len() {
        return Err(Error::Shape(format!(
            "真实标签{}个，预测标签{}个",
            y_true.len(),
            y_pred.len()
        )));
    }
    Ok(())
}

/// 预测正确的比例。空输入得到0。
pub fn accuracy_score(y_true: &[usize], y_pred: &[usize]) -> Result<f64> {
    check_len(y_true, y_pred)?;
    if y_true.is_empty() {
        return Ok(0.0);
    }
    let hit = y_true.iter().zip(y_pred).filter(|(a, b)| a == b).count();
    Ok(hit as f64 / y_true.len() as f64)
}

/// 混淆矩阵：行为真实标签，列为预测标签，标签为两者出现过的标签并集（升序）。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfusionMatrix {
    labels: Vec<usize>,
    counts: Array2<usize>,
}

impl ConfusionMatrix {
    pub fn new(y_true: &[usize], y_pred: &[usize]) -> Result<Self> {
        check_len(y_true, y_pred)?;
        let mut labels: Vec<usize> = y_true.iter().chain(y_pred).copied().collect();
        labels.sort_unstable();
        labels.dedup();

        let mut counts = Array2::zeros((labels.len(), labels.len()));
        for (t, p) in y_true.iter().zip(y_pred) {
            // labels来自两者的并集，一定能找到
            if let (Ok(r), Ok(c)) = (labels.binary_search(t), labels.binary_search(p)) {
                counts[[r, c]] += 1;
            }
        }
        Ok(Self { labels, counts })
    }

    #[inline]
    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    #[inline]
    pub fn counts(&self) -> &Array2<usize> {
        &self.counts
    }

    #[inline]
    pub fn total(&self) -> usize {
        self.counts.sum()
    }

    /// 对角线之和，即预测正确的样本数。
    #[inline]
    pub fn correct(&self) -> usize {
        self.counts.diag().sum()
    }
}

/// 按列右对齐的矩阵文本，例如
///
/// ```text
/// [[10  2]
///  [ 3 15]]
/// ```
impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.labels.is_empty() {
            return write!(f, "[]");
        }
        let width = self
            .counts
            .iter()
            .map(|v| v.to_string().len())
            .max()
            .unwrap_or(1);
        let rows = self.counts.nrows();
        for (r, row) in self.counts.rows().into_iter().enumerate() {
            f.write_str(if r == 0 { "[[" } else { " [" })?;
            for (c, v) in row.iter().enumerate() {
                if c > 0 {
                    f.write_str(" ")?;
                }
                write!(f, "{v:>width$}")?;
            }
            f.write_str("]")?;
            if r + 1 == rows {
                f.write_str("]")?;
            } else {
                f.write_str("\n")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn test_argmax_rows() {
        let x = arr2(&[[0.1_f32, 0.7, 0.2], [0.5, 0.5, 0.0], [-1.0, -2.0, -0.5]]);
        assert_eq!(argmax_rows(x.view()), vec![1, 0, 2]);
    }

    #[test]
    fn test_accuracy() {
        assert_eq!(accuracy_score(&[0, 1, 2, 1], &[0, 2, 2, 1]).unwrap(), 0.75);
        assert_eq!(accuracy_score(&[], &[]).unwrap(), 0.0);
        assert!(accuracy_score(&[0], &[0, 1]).is_err());
    }

    #[test]
    fn test_confusion_matrix() {
        let y_true = [2, 0, 2, 2, 0, 1];
        let y_pred = [0, 0, 2, 2, 0, 2];
        let cm = ConfusionMatrix::new(&y_true, &y_pred).unwrap();
        assert_eq!(cm.labels(), &[0, 1, 2]);
        assert_eq!(cm.counts(), &arr2(&[[2, 0, 0], [0, 0, 1], [1, 0, 2]]));
        assert_eq!(cm.total(), y_true.len());
        let acc = accuracy_score(&y_true, &y_pred).unwrap();
        assert!((cm.correct() as f64 / cm.total() as f64 - acc).abs() < 1e-12);
        assert_eq!(cm.to_string(), "[[2 0 0]\n [0 0 1]\n [1 0 2]]");
    }

    #[test]
    fn test_confusion_matrix_sparse_labels() {
        // 只出现过的标签参与，且按升序排列
        let cm = ConfusionMatrix::new(&[7, 3, 3, 7], &[7, 7, 3, 7]).unwrap();
        assert_eq!(cm.labels(), &[3, 7]);
        assert_eq!(cm.to_string(), "[[1 1]\n [0 2]]");

        let big = ConfusionMatrix::new(&[0; 12], &[0; 12]).unwrap();
        assert_eq!(big.to_string(), "[[12]]");

        let wide = ConfusionMatrix::new(&[0, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1], &[0; 11]).unwrap();
        assert_eq!(wide.to_string(), "[[ 1  0]\n [10  0]]");
    }
}
