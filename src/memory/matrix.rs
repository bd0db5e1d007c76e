//! 行主序的嵌入矩阵：每行对应一条记忆
//!
//! 列数由第一行确定；之后所有行必须同维。

use crate::core::MemoryError;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmbeddingMatrix {
    cols: usize,
    data: Vec<f32>,
}

impl EmbeddingMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从二维数组构造；行长不一致返回 None
    pub fn from_rows(rows: Vec<Vec<f32>>) -> Option<Self> {
        let mut m = Self::new();
        for row in rows {
            m.push_row(&row).ok()?;
        }
        Some(m)
    }

    pub fn rows(&self) -> usize {
        if self.cols == 0 {
            0
        } else {
            self.data.len() / self.cols
        }
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows(), self.cols)
    }

    /// 校验维度但不写入
    pub fn check_row(&self, row: &[f32]) -> Result<(), MemoryError> {
        if row.is_empty() || (self.cols != 0 && row.len() != self.cols) {
            return Err(MemoryError::DimensionMismatch {
                expected: self.cols,
                actual: row.len(),
            });
        }
        Ok(())
    }

    pub fn push_row(&mut self, row: &[f32]) -> Result<(), MemoryError> {
        self.check_row(row)?;
        if self.cols == 0 {
            self.cols = row.len();
        }
        self.data.extend_from_slice(row);
        Ok(())
    }

    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    /// 删除最旧的 n 行（保留列数）
    pub fn drain_front(&mut self, n: usize) {
        let n = n.min(self.rows());
        self.data.drain(..n * self.cols);
    }

    pub fn clear(&mut self) {
        self.cols = 0;
        self.data.clear();
    }

    /// 每行与 query 的点积（不做归一化）
    pub fn dot_scores(&self, query: &[f32]) -> Vec<f32> {
        (0..self.rows())
            .map(|i| self.row(i).iter().zip(query).map(|(a, b)| a * b).sum())
            .collect()
    }

    pub fn to_rows(&self) -> Vec<Vec<f32>> {
        (0..self.rows()).map(|i| self.row(i).to_vec()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_drain_front() {
        let mut m = EmbeddingMatrix::new();
        m.push_row(&[1.0, 0.0]).unwrap();
        m.push_row(&[0.0, 1.0]).unwrap();
        m.push_row(&[1.0, 1.0]).unwrap();
        assert_eq!(m.shape(), (3, 2));
        m.drain_front(2);
        assert_eq!(m.shape(), (1, 2));
        assert_eq!(m.row(0), &[1.0, 1.0]);
    }

    #[test]
    fn test_rejects_ragged_rows() {
        let mut m = EmbeddingMatrix::new();
        m.push_row(&[1.0, 2.0]).unwrap();
        assert!(matches!(
            m.push_row(&[1.0]),
            Err(MemoryError::DimensionMismatch { expected: 2, actual: 1 })
        ));
        assert_eq!(m.rows(), 1);
        assert!(EmbeddingMatrix::from_rows(vec![vec![1.0], vec![1.0, 2.0]]).is_none());
    }

    #[test]
    fn test_dot_scores_unnormalized() {
        let m = EmbeddingMatrix::from_rows(vec![vec![2.0, 0.0], vec![0.5, 0.5]]).unwrap();
        assert_eq!(m.dot_scores(&[1.0, 1.0]), vec![2.0, 1.0]);
    }
}
