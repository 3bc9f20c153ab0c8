//! 流水线运行统计.

use perf_berry::prelude::*;
use std::time::{Duration, Instant};

/// ablation 计时器.
///
/// 支持 "中途中断" 与 "结束中断, 继续开始计时".
#[derive(Clone, Debug)]
struct AccTimer {
    consumed: Duration,
    since: Instant,
}

impl AccTimer {
    /// 初始化计时器. 初始化时视为已经开始计时.
    #[inline]
    fn new() -> Self {
        Self {
            consumed: Duration::ZERO,
            since: Instant::now(),
        }
    }

    #[inline]
    fn start(&mut self) {
        self.since = Instant::now();
    }

    /// 结束计时, 并将这一区间的时间累加. 返回本轮计时时长.
    ///
    /// 上一次调用必须是 `self.start()`.
    #[inline]
    fn elapsed(&mut self) -> Duration {
        let d = self.since.elapsed();
        self.consumed += d;
        d
    }

    /// 累计时间 (毫秒).
    #[inline]
    fn total_ms(&self) -> u64 {
        self.consumed.as_millis() as u64
    }
}

/// 一种筛选配置在整个队列上的统计.
#[derive(Clone, Debug)]
pub struct Profile {
    /// 至少纳入一根血管的扫描个数.
    completed: u64,

    /// 没有找到血管的扫描个数.
    empty: u64,

    /// 分析失败的扫描个数.
    failed: u64,

    /// 显著簇总数.
    detected: u64,

    /// 分组后的孤立簇总数.
    lone: u64,

    /// 纳入血管总数.
    included: u64,

    /// 超出编码流速而被排除的血管总数.
    violations: u64,

    /// 各扫描平均流速之和, 用于求队列均值.
    vmean_sum: f64,

    /// 各扫描 PI_norm 之和.
    pi_sum: f64,

    scan_time: AccTimer,
    real_time: AccTimer,

    /// 最耗时的一个扫描.
    most: Option<Duration>,
}

impl Profile {
    #[inline]
    pub fn new() -> Self {
        Self {
            completed: 0,
            empty: 0,
            failed: 0,
            detected: 0,
            lone: 0,
            included: 0,
            violations: 0,
            vmean_sum: 0.0,
            pi_sum: 0.0,
            scan_time: AccTimer::new(),
            real_time: AccTimer::new(),
            most: None,
        }
    }

    /// 开始一个扫描的计时.
    #[inline]
    pub fn scan_start(&mut self) {
        self.scan_time.start();
    }

    /// 结束一个扫描的计时.
    #[inline]
    pub fn scan_elapsed(&mut self) {
        let d = self.scan_time.elapsed();
        self.most = Some(self.most.map_or(d, |m| m.max(d)));
    }

    #[inline]
    pub fn count_failed(&mut self) {
        self.failed += 1;
    }

    /// 记录一个扫描的分析结果.
    pub fn count_outcome(&mut self, outcome: &ScanOutcome) {
        match outcome {
            ScanOutcome::Completed(result) => {
                self.completed += 1;
                self.vmean_sum += result.stats.vmean;
                self.pi_sum += result.stats.pi_norm;
            }
            ScanOutcome::NoVessels(_) => self.empty += 1,
            ScanOutcome::AwaitingReview(_) => self.failed += 1,
        }
        if let Some(s) = outcome.summary() {
            self.detected += s.detected as u64;
            self.lone += s.lone.unwrap_or(s.detected) as u64;
            self.included += s.included as u64;
            self.violations += s.encoding_violations as u64;
        }
    }

    /// 结束全部计时.
    #[inline]
    pub fn finish(mut self) -> Self {
        self.real_time.elapsed();
        self
    }

    #[inline]
    pub fn get_completed(&self) -> u64 {
        self.completed
    }

    #[inline]
    pub fn get_empty(&self) -> u64 {
        self.empty
    }

    #[inline]
    pub fn get_failed(&self) -> u64 {
        self.failed
    }

    #[inline]
    pub fn get_detected(&self) -> u64 {
        self.detected
    }

    #[inline]
    pub fn get_lone(&self) -> u64 {
        self.lone
    }

    #[inline]
    pub fn get_included(&self) -> u64 {
        self.included
    }

    #[inline]
    pub fn get_violations(&self) -> u64 {
        self.violations
    }

    /// 完成扫描的平均纳入血管数.
    pub fn get_avg_included(&self) -> Option<f64> {
        match self.completed + self.empty {
            0 => None,
            n => Some(self.included as f64 / n as f64),
        }
    }

    /// 完成扫描的平均 Vmean.
    pub fn get_avg_vmean(&self) -> Option<f64> {
        match self.completed {
            0 => None,
            n => Some(self.vmean_sum / n as f64),
        }
    }

    /// 完成扫描的平均 PI_norm.
    pub fn get_avg_pi_norm(&self) -> Option<f64> {
        match self.completed {
            0 => None,
            n => Some(self.pi_sum / n as f64),
        }
    }

    /// 流水线总耗时 (毫秒).
    #[inline]
    pub fn get_scan_time_ms(&self) -> u64 {
        self.scan_time.total_ms()
    }

    /// 任务总耗时 (毫秒).
    #[inline]
    pub fn get_real_time_ms(&self) -> u64 {
        self.real_time.total_ms()
    }

    #[inline]
    pub fn get_most_time_consuming(&self) -> Option<Duration> {
        self.most
    }
}

impl Default for Profile {
    fn default() -> Self {
        Self::new()
    }
}
