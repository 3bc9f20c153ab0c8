//! 结果记录与写出.
//!
//! 每次扫描产生两张表: 逐体素表 (`*-Vessel_Data.txt`) 与汇总表
//! (`*-averagePIandVelocity_Data.txt`), 均为制表符分隔, 末尾附带复现分析所需的参数.
//! 血管掩膜另存为 PNG.

use crate::config::{AnalysisConfig, Structure};
use crate::mask::save_png;
use crate::params::{CohortStats, Inclusion, Vessel};
use crate::pipeline::{AnalysisState, ScanResult};
use crate::significance::div0;
use crate::{AnalysisResult, Mask2d};
use ndarray::{s, Array2, Zip};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// 单次扫描的汇总记录.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSummary {
    /// 扫描名称.
    pub name: String,

    /// 分析的结构.
    pub structure: Option<Structure>,

    /// 编码流速 (cm/s).
    pub venc: f64,

    /// 聚类得到的簇个数.
    pub detected: usize,

    /// 高幅值簇个数.
    pub positive_mag: usize,

    /// 低幅值簇个数.
    pub negative_mag: usize,

    /// 等幅簇个数.
    pub isointense: usize,

    /// 垂直簇个数. 未做垂直度筛选时为 `None`.
    pub perpendicular: Option<usize>,

    /// 非垂直簇个数. 未做垂直度筛选时为 `None`.
    pub non_perpendicular: Option<usize>,

    /// 去重后保留的血管个数. 未去重时为 `None`.
    pub lone: Option<usize>,

    /// 去重时被合并的簇个数. 未去重时为 `None`.
    pub clustered: Option<usize>,

    /// 纳入统计的血管个数.
    pub included: usize,

    /// 因流速超过编码流速而剔除的血管个数.
    pub encoding_violations: usize,

    /// 平均流速.
    pub vmean: Option<f64>,

    /// 归一化搏动指数.
    pub pi_norm: Option<f64>,

    /// `vmean` 的标准误.
    pub vmean_sem: Option<f64>,

    /// `pi_norm` 的标准误.
    pub pi_norm_sem: Option<f64>,

    /// 精化后感兴趣区的像素数.
    pub mask_pixels: usize,

    /// 感兴趣区内的平均幅值 SNR.
    pub magnitude_snr_mask: f64,

    /// 血管内的平均幅值 SNR.
    pub magnitude_snr_vessels: f64,

    /// 感兴趣区内的平均流速 SNR (绝对值).
    pub velocity_snr_mask: f64,

    /// 血管内的平均流速 SNR (绝对值).
    pub velocity_snr_vessels: f64,
}

/// `mask` 内非零值的均值. 没有非零值时为 0.
pub fn nonzero_mean(values: &Array2<f64>, mask: &Mask2d) -> f64 {
    let (mut sum, mut n) = (0.0, 0usize);
    Zip::from(values).and(mask).for_each(|&v, &m| {
        if m && v != 0.0 {
            sum += v;
            n += 1;
        }
    });
    div0(sum, n as f64)
}

impl ScanSummary {
    /// 由分析状态与参数计算结果汇总.
    pub fn new(
        state: &AnalysisState,
        vessel_mask: &Mask2d,
        inclusion: &Inclusion,
        stats: Option<&CohortStats>,
    ) -> Self {
        let region = &state.refinement.region;
        let mag_snr = &state.noise.mean_magnitude_snr;
        let vel_snr = state.noise.velocity_snr.mapv(f64::abs);
        let sem = |f: fn(&CohortStats) -> Option<f64>| {
            stats
                .and_then(f)
                .filter(|_| state.config.reports_sem())
        };

        Self {
            name: state.name.clone(),
            structure: state.config.structure,
            venc: state.venc,
            detected: state.detected,
            positive_mag: state.counts.positive_mag,
            negative_mag: state.counts.negative_mag,
            isointense: state.counts.isointense,
            perpendicular: state.perpendicular.map(|p| p.0),
            non_perpendicular: state.perpendicular.map(|p| p.1),
            lone: state.deduplicated.map(|d| d.0),
            clustered: state.deduplicated.map(|d| d.1),
            included: inclusion.included.len(),
            encoding_violations: inclusion.encoding_violations,
            vmean: stats.map(|s| s.vmean),
            pi_norm: stats.map(|s| s.pi_norm),
            vmean_sem: sem(|s| s.vmean_sem),
            pi_norm_sem: sem(|s| s.pi_norm_sem),
            mask_pixels: crate::mask::count(region),
            magnitude_snr_mask: nonzero_mean(mag_snr, region),
            magnitude_snr_vessels: nonzero_mean(mag_snr, vessel_mask),
            velocity_snr_mask: nonzero_mean(&vel_snr, region),
            velocity_snr_vessels: nonzero_mean(&vel_snr, vessel_mask),
        }
    }

    /// 汇总表的 `(键, 值)` 行. 未计算的项不输出.
    pub fn rows(&self) -> Vec<(&'static str, String)> {
        let mut rows = vec![
            ("No. detected vessels", self.detected.to_string()),
            ("No. MPos vessels", self.positive_mag.to_string()),
            ("No. MNeg vessels", self.negative_mag.to_string()),
            ("No. MIso vessels", self.isointense.to_string()),
        ];
        let mut opt = |key: &'static str, v: Option<String>| {
            if let Some(v) = v {
                rows.push((key, v));
            }
        };
        opt("No. perpendicular vessels", self.perpendicular.map(|n| n.to_string()));
        opt(
            "No. non-perpendicular vessels",
            self.non_perpendicular.map(|n| n.to_string()),
        );
        opt("No. lone vessels", self.lone.map(|n| n.to_string()));
        opt("No. cluster vessels", self.clustered.map(|n| n.to_string()));
        opt("No. included vessels", Some(self.included.to_string()));
        opt("Vmean vessels", self.vmean.map(fmt4));
        opt("PI_norm vessels", self.pi_norm.map(fmt4));
        opt("Vmean SEM", self.vmean_sem.map(fmt4));
        opt("PI_norm SEM", self.pi_norm_sem.map(fmt4));
        opt("No. excluded (|v| > venc)", Some(self.encoding_violations.to_string()));
        opt("No. BG mask pixels", Some(self.mask_pixels.to_string()));
        opt("mean SNR magnitude mask", Some(fmt4(self.magnitude_snr_mask)));
        opt("mean SNR magnitude vessels", Some(fmt4(self.magnitude_snr_vessels)));
        opt("mean SNR velocity mask", Some(fmt4(self.velocity_snr_mask)));
        opt("mean SNR velocity vessels", Some(fmt4(self.velocity_snr_vessels)));
        rows
    }
}

/// 逐体素记录. 坐标与编号均从 1 开始.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoxelRecord {
    /// 像素编号 `col * width + row + 1`.
    pub pixel: usize,

    /// 行.
    pub ir: usize,

    /// 列.
    pub ic: usize,

    /// 血管编号.
    pub iblob: usize,

    /// 在血管内按时间平均流速绝对值从大到小的名次.
    pub ipixel: usize,

    #[allow(missing_docs)]
    pub vneg: bool,
    #[allow(missing_docs)]
    pub vpos: bool,
    #[allow(missing_docs)]
    pub mpos: bool,
    #[allow(missing_docs)]
    pub miso: bool,
    #[allow(missing_docs)]
    pub mneg: bool,

    /// 平均幅值.
    pub mean_mag: f64,

    /// 幅值噪声标准差.
    pub std_mag_noise: f64,

    /// 时间平均去背景流速 (带符号).
    pub mean_v: f64,

    /// 去背景流速绝对值的最小值.
    pub min_v: f64,

    /// 去背景流速绝对值的最大值.
    pub max_v: f64,

    /// `|(max_v - min_v) / mean_v|`.
    pub pi: f64,

    /// 相位数.
    pub n_pha: usize,

    /// 幅值连通块编号.
    pub im_blob: i32,

    /// 逐相位幅值.
    pub magnitude: Vec<f64>,

    /// 逐相位去背景流速.
    pub velocity: Vec<f64>,
}

/// 为所有纳入统计的血管生成逐体素记录.
pub fn voxel_records(state: &AnalysisState, vessels: &[Vessel]) -> Vec<VoxelRecord> {
    let width = state.shape().1;
    let mean_v = &state.mean_corrected;
    let mut out = Vec::new();

    for (idx, vessel) in vessels.iter().enumerate() {
        let mut pixels = vessel.cluster.pixels().to_vec();
        pixels.sort_by(|a, b| mean_v[*b].abs().total_cmp(&mean_v[*a].abs()));

        for (rank, &(r, c)) in pixels.iter().enumerate() {
            let velocity = state.noise.corrected_velocity.slice(s![.., r, c]);
            let magnitude = state.magnitude.slice(s![.., r, c]);
            let (min_v, max_v) = velocity
                .iter()
                .map(|v| v.abs())
                .fold((f64::INFINITY, 0.0f64), |(lo, hi), v| (lo.min(v), hi.max(v)));
            let flags = state.masks.flags_at((r, c));

            out.push(VoxelRecord {
                pixel: c * width + r + 1,
                ir: r + 1,
                ic: c + 1,
                iblob: idx + 1,
                ipixel: rank + 1,
                vneg: flags.vneg,
                vpos: flags.vpos,
                mpos: flags.mpos,
                miso: flags.miso,
                mneg: flags.mneg,
                mean_mag: state.backgrounds.mean_magnitude[(r, c)],
                std_mag_noise: state.backgrounds.noise[(r, c)],
                mean_v: mean_v[(r, c)],
                min_v,
                max_v,
                pi: div0(max_v - min_v, mean_v[(r, c)]).abs(),
                n_pha: velocity.len(),
                im_blob: state.blob_map[(r, c)],
                magnitude: magnitude.to_vec(),
                velocity: velocity.to_vec(),
            });
        }
    }
    out
}

/// 保留四位小数.
pub fn fmt4(v: f64) -> String {
    let r = (v * 1e4).round() / 1e4;
    // 避免输出 `-0`.
    let r = if r == 0.0 { 0.0 } else { r };
    r.to_string()
}

#[inline]
fn localize(text: String, decimal_comma: bool) -> String {
    if decimal_comma {
        text.replace('.', ",")
    } else {
        text
    }
}

/// 复现分析所需的附加信息: 全部配置项、venc、版本号与扫描名称.
pub fn addon_rows(config: &AnalysisConfig, venc: f64, name: &str) -> AnalysisResult<Vec<(String, String)>> {
    let mut rows = Vec::new();
    if let serde_json::Value::Object(map) = serde_json::to_value(config)? {
        for (key, value) in map {
            let text = match value {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            rows.push((key, text));
        }
    }
    rows.push(("venc".to_string(), venc.to_string()));
    rows.push(("version".to_string(), env!("CARGO_PKG_VERSION").to_string()));
    rows.push(("filename".to_string(), name.to_string()));
    Ok(rows)
}

fn write_addon<W: Write>(w: &mut W, addon: &[(String, String)]) -> io::Result<()> {
    writeln!(w)?;
    for (key, value) in addon {
        writeln!(w, "{key}\t{value}")?;
    }
    Ok(())
}

/// 写出逐体素表. 每个字段后跟一个制表符.
pub fn write_voxel_table<W: Write>(
    w: &mut W,
    records: &[VoxelRecord],
    addon: &[(String, String)],
    decimal_comma: bool,
) -> io::Result<()> {
    const HEAD: [&str; 18] = [
        "pixel", "ir", "ic", "iblob", "ipixel", "Vneg", "Vpos", "Mpos", "Miso", "Mneg", "meanMag",
        "stdMagnoise", "meanV", "minV", "maxV", "PI", "nPha", "imBlob",
    ];

    if let Some(first) = records.first() {
        for h in HEAD {
            write!(w, "{h}\t")?;
        }
        for i in 1..=first.magnitude.len() {
            write!(w, "Mpha{i:02}\t")?;
        }
        for i in 1..=first.velocity.len() {
            write!(w, "Vpha{i:02}\t")?;
        }
        writeln!(w)?;
    }

    let flag = |b: bool| u8::from(b).to_string();
    for rec in records {
        let mut fields = vec![
            rec.pixel.to_string(),
            rec.ir.to_string(),
            rec.ic.to_string(),
            rec.iblob.to_string(),
            rec.ipixel.to_string(),
            flag(rec.vneg),
            flag(rec.vpos),
            flag(rec.mpos),
            flag(rec.miso),
            flag(rec.mneg),
            fmt4(rec.mean_mag),
            fmt4(rec.std_mag_noise),
            fmt4(rec.mean_v),
            fmt4(rec.min_v),
            fmt4(rec.max_v),
            fmt4(rec.pi),
            rec.n_pha.to_string(),
            rec.im_blob.to_string(),
        ];
        fields.extend(rec.magnitude.iter().map(|&v| fmt4(v)));
        fields.extend(rec.velocity.iter().map(|&v| fmt4(v)));
        for f in fields {
            write!(w, "{}\t", localize(f, decimal_comma))?;
        }
        writeln!(w)?;
    }

    write_addon(w, addon)
}

/// 写出汇总表.
pub fn write_summary<W: Write>(
    w: &mut W,
    summary: &ScanSummary,
    addon: &[(String, String)],
    decimal_comma: bool,
) -> io::Result<()> {
    for (key, value) in summary.rows() {
        writeln!(w, "{key}\t{}", localize(value, decimal_comma))?;
    }
    write_addon(w, addon)
}

/// 一次扫描写出的文件.
#[derive(Debug, Clone)]
pub struct ScanFiles {
    /// 逐体素表.
    pub voxels: PathBuf,

    /// 汇总表.
    pub summary: PathBuf,

    /// 血管掩膜.
    pub vessel_mask: PathBuf,
}

/// 将结果写入目录 `dir`, 文件名以扫描名称为前缀.
pub fn write_scan<P: AsRef<Path>>(
    result: &ScanResult,
    config: &AnalysisConfig,
    dir: P,
) -> AnalysisResult<ScanFiles> {
    let dir = dir.as_ref();
    let name = &result.summary.name;
    let files = ScanFiles {
        voxels: dir.join(format!("{name}-Vessel_Data.txt")),
        summary: dir.join(format!("{name}-averagePIandVelocity_Data.txt")),
        vessel_mask: dir.join(format!("{name}-Vessel_Mask.png")),
    };
    let addon = addon_rows(config, result.summary.venc, name)?;

    let mut w = BufWriter::new(File::create(&files.voxels)?);
    write_voxel_table(&mut w, &result.records, &addon, config.decimal_comma)?;
    w.flush()?;

    let mut w = BufWriter::new(File::create(&files.summary)?);
    write_summary(&mut w, &result.summary, &addon, config.decimal_comma)?;
    w.flush()?;

    save_png(&result.vessel_mask, &files.vessel_mask)?;
    Ok(files)
}
