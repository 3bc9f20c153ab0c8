//! 感兴趣区掩膜的读取与持久化存储.
//!
//! 支持 `.png`, `.npy`, `.nii`/`.nii.gz`. MATLAB `.mat` 容器不受支持.

use crate::consts::gray::{BLACK, WHITE};
use crate::{AnalysisError, AnalysisResult, Mask2d};
use ndarray::{Array2, ArrayView2, IxDyn};
use ndarray_npy::{read_npy, write_npy, ReadNpyError};
use nifti::{IntoNdArray, NiftiObject, ReaderOptions};
use std::path::Path;

/// 按 `value >= threshold` 二值化概率图.
pub fn binarize(prob: ArrayView2<f64>, threshold: f64) -> Mask2d {
    prob.mapv(|v| v >= threshold)
}

/// 前景像素个数.
#[inline]
pub fn count(mask: &Mask2d) -> usize {
    mask.iter().filter(|&&v| v).count()
}

/// 读取掩膜文件并按 `threshold` 二值化.
pub fn load_region_mask<P: AsRef<Path>>(path: P, threshold: f64) -> AnalysisResult<Mask2d> {
    let prob = load_probability(path.as_ref())?;
    Ok(binarize(prob.view(), threshold))
}

/// 读取掩膜文件为浮点概率图, 形状 `(H, W)`.
pub fn load_probability(path: &Path) -> AnalysisResult<Array2<f64>> {
    if !path.is_file() {
        return Err(AnalysisError::MissingData(format!(
            "mask file `{}` does not exist",
            path.display()
        )));
    }
    let name = path
        .file_name()
        .map(|s| s.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    if name.ends_with(".png") {
        let img = image::open(path)?.to_luma8();
        let (w, h) = img.dimensions();
        Ok(Array2::from_shape_fn((h as usize, w as usize), |(r, c)| {
            img.get_pixel(c as u32, r as u32).0[0] as f64 / WHITE as f64
        }))
    } else if name.ends_with(".npy") {
        load_npy(path)
    } else if name.ends_with(".nii") || name.ends_with(".nii.gz") {
        load_nifti(path)
    } else if name.ends_with(".mat") {
        Err(AnalysisError::unsupported(
            path,
            "MATLAB containers are not supported, export the mask as .npy or .png",
        ))
    } else {
        Err(AnalysisError::unsupported(path, "unknown mask extension"))
    }
}

/// `.npy` 可能以多种 dtype 保存, 依次尝试.
fn load_npy(path: &Path) -> AnalysisResult<Array2<f64>> {
    fn retry<T>(r: Result<T, ReadNpyError>) -> Result<Option<T>, ReadNpyError> {
        match r {
            Ok(v) => Ok(Some(v)),
            Err(ReadNpyError::WrongDescriptor(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    if let Some(a) = retry(read_npy::<_, Array2<f64>>(path))? {
        return Ok(a);
    }
    if let Some(a) = retry(read_npy::<_, Array2<f32>>(path))? {
        return Ok(a.mapv(f64::from));
    }
    if let Some(a) = retry(read_npy::<_, Array2<u8>>(path))? {
        return Ok(a.mapv(f64::from));
    }
    if let Some(a) = retry(read_npy::<_, Array2<i64>>(path))? {
        return Ok(a.mapv(|v| v as f64));
    }
    if let Some(a) = retry(read_npy::<_, Array2<bool>>(path))? {
        return Ok(a.mapv(|v| if v { 1.0 } else { 0.0 }));
    }
    Err(AnalysisError::unsupported(path, "unsupported npy dtype"))
}

/// nii 数据按 `(W, H, ...)` 存储, 取第一张切片并转换成 `(H, W)`.
fn load_nifti(path: &Path) -> AnalysisResult<Array2<f64>> {
    let obj = ReaderOptions::new().read_file(path)?;
    let volume = obj.into_volume().into_ndarray::<f64>()?;
    let ndim = volume.ndim();
    if ndim < 2 {
        return Err(AnalysisError::unsupported(path, "nifti mask must be at least 2D"));
    }
    let (w, h) = (volume.shape()[0], volume.shape()[1]);
    let mut idx = vec![0; ndim];
    Ok(Array2::from_shape_fn((h, w), |(r, c)| {
        idx[0] = c;
        idx[1] = r;
        volume[IxDyn(&idx)]
    }))
}

/// 将掩膜保存为 PNG. 前景为白色, 背景为黑色.
pub fn save_png<P: AsRef<Path>>(mask: &Mask2d, path: P) -> AnalysisResult<()> {
    let (height, width) = mask.dim();
    let mut buf = image::GrayImage::new(width as u32, height as u32);
    for ((h, w), &fg) in mask.indexed_iter() {
        let pix = if fg { WHITE } else { BLACK };
        buf.put_pixel(w as u32, h as u32, image::Luma([pix]));
    }
    buf.save(path)?;
    Ok(())
}

/// 将掩膜保存为 `u8` 类型的 `.npy`.
pub fn save_npy<P: AsRef<Path>>(mask: &Mask2d, path: P) -> AnalysisResult<()> {
    write_npy(path, &mask.mapv(u8::from))?;
    Ok(())
}
