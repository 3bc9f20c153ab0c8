//! 运行时错误.

use std::path::PathBuf;
use thiserror::Error;

/// 分析流水线的运行时错误.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// 配置项取值非法.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// 缺少必须的输入 (帧数据、掩膜等).
    #[error("missing input: {0}")]
    MissingData(String),

    /// 文件格式不受支持.
    #[error("unsupported format for `{}`: {reason}", .path.display())]
    UnsupportedFormat {
        /// 出错文件.
        path: PathBuf,
        /// 具体原因.
        reason: String,
    },

    /// 无法从采集参数中解析出编码流速 (venc).
    #[error("unrecognized acquisition: {0}")]
    UnrecognizedAcquisition(String),

    /// 两个输入的平面尺寸不一致.
    #[error("shape mismatch: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        /// 期望尺寸 `(h, w)`.
        expected: (usize, usize),
        /// 实际尺寸 `(h, w)`.
        found: (usize, usize),
    },

    /// 运行被调用方取消.
    #[error("analysis cancelled during `{stage}`")]
    Cancelled {
        /// 取消时所处阶段.
        stage: &'static str,
    },

    #[error(transparent)]
    #[allow(missing_docs)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    #[allow(missing_docs)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    #[allow(missing_docs)]
    ReadNpy(#[from] ndarray_npy::ReadNpyError),

    #[error(transparent)]
    #[allow(missing_docs)]
    WriteNpy(#[from] ndarray_npy::WriteNpyError),

    #[error(transparent)]
    #[allow(missing_docs)]
    Nifti(#[from] nifti::NiftiError),

    #[error(transparent)]
    #[allow(missing_docs)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    #[allow(missing_docs)]
    Bincode(#[from] bincode::Error),
}

impl AnalysisError {
    /// 批处理时可跳过 (记录后继续处理下一个扫描) 的错误.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::MissingData(_) | Self::UnsupportedFormat { .. })
    }

    #[inline]
    pub(crate) fn unsupported<P: Into<PathBuf>, S: Into<String>>(path: P, reason: S) -> Self {
        Self::UnsupportedFormat {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// 流水线运行结果.
pub type AnalysisResult<T> = Result<T, AnalysisError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable() {
        assert!(AnalysisError::MissingData("mask".into()).is_recoverable());
        assert!(AnalysisError::unsupported("a.mat", "matlab").is_recoverable());
        assert!(!AnalysisError::Configuration("x".into()).is_recoverable());
        assert!(!AnalysisError::Cancelled { stage: "cluster" }.is_recoverable());
    }

    #[test]
    fn test_display() {
        let e = AnalysisError::ShapeMismatch {
            expected: (4, 4),
            found: (3, 4),
        };
        assert_eq!(e.to_string(), "shape mismatch: expected (4, 4), found (3, 4)");
        let e = AnalysisError::unsupported("/tmp/mask.mat", "matlab container");
        assert!(e.to_string().contains("/tmp/mask.mat"));
    }
}
