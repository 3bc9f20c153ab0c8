//! 血管筛选步骤的消融实验.
//!
//! 在同一组合成扫描上分别以不同的筛选配置运行完整流水线,
//! 比较各配置纳入的血管个数、平均流速与运行时间.

mod profile;
mod result;
mod runner;

fn main() {
    simple_logger::init_with_level(log::Level::Warn).expect("Logger init error");
    runner::run().analyze();
}
