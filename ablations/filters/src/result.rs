//! 实验结果.

use crate::profile::Profile;
use std::io::{self, Write};

/// 将 `p` 的结果写进 `w` 中.
fn describe_into<W: Write>(name: &str, p: &Profile, w: &mut W) -> io::Result<()> {
    const S4: &str = "    ";

    #[inline]
    fn f64_to_display(f: Option<f64>) -> String {
        match f {
            Some(f) => format!("{f:.4}"),
            None => "/".to_string(),
        }
    }

    writeln!(w, "Profile `{name}`:")?;
    writeln!(
        w,
        "{S4}Scans: {} completed, {} without vessels, {} failed",
        p.get_completed(),
        p.get_empty(),
        p.get_failed()
    )?;
    writeln!(w, "{S4}Significant clusters: {}", p.get_detected())?;
    writeln!(w, "{S4}Lone clusters: {}", p.get_lone())?;
    writeln!(w, "{S4}Included vessels: {}", p.get_included())?;
    writeln!(w, "{S4}Venc violations: {}", p.get_violations())?;
    writeln!(
        w,
        "{S4}Average included per scan: {}",
        f64_to_display(p.get_avg_included())
    )?;
    writeln!(w, "{S4}Average Vmean: {} cm/s", f64_to_display(p.get_avg_vmean()))?;
    writeln!(w, "{S4}Average PI_norm: {}", f64_to_display(p.get_avg_pi_norm()))?;
    writeln!(w, "{S4}Pipeline time: {} ms", p.get_scan_time_ms())?;
    writeln!(w, "{S4}Total machine time: {} ms", p.get_real_time_ms())?;
    let t = p.get_most_time_consuming().map(|d| d.as_millis() as f64);
    write!(w, "{S4}Slowest scan costs {} ms", f64_to_display(t))?;
    Ok(())
}

/// 消融实验最终结果.
pub struct AblationResult {
    data: Vec<(&'static str, Profile)>,
}

impl AblationResult {
    pub fn from_iter<I: IntoIterator<Item = (&'static str, Profile)>>(it: I) -> Self {
        Self {
            data: it.into_iter().collect(),
        }
    }

    /// 输出运行结果.
    pub fn analyze(&self) {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        if let Err(e) = self.write_to(&mut out) {
            log::error!("cannot write ablation result: {e}");
        }
    }

    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        utils::sep_to(&mut *w)?;
        for (key, profile) in self.data.iter() {
            describe_into(key, profile, w)?;
            writeln!(w)?;
            utils::sep_to(&mut *w)?;
        }
        Ok(())
    }
}
