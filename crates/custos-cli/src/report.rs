//! Recognition reports over a range of whole days.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use custos_core::RecognitionEvent;
use std::path::{Path, PathBuf};

const WIDTH: usize = 50;

/// Inclusive range of calendar days, interpreted in a given time zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl ReportRange {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Result<Self> {
        if from > to {
            bail!("report start {from} is after its end {to}");
        }
        Ok(Self { from, to })
    }

    /// UTC instants covering `from` 00:00:00.000 through `to` 23:59:59.999 in `tz`.
    pub fn utc_bounds<Tz: TimeZone>(&self, tz: &Tz) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
        let start = local_midnight(tz, self.from)?;
        let next = self.to.succ_opt().context("report end date out of range")?;
        let end = local_midnight(tz, next)? - chrono::Duration::milliseconds(1);
        Ok((start, end))
    }

    pub fn file_name(&self) -> String {
        format!("report_{}_to_{}.txt", self.from, self.to)
    }
}

fn local_midnight<Tz: TimeZone>(tz: &Tz, day: NaiveDate) -> Result<DateTime<Utc>> {
    let midnight = day.and_hms_opt(0, 0, 0).context("invalid midnight")?;
    let local = tz
        .from_local_datetime(&midnight)
        .earliest()
        .with_context(|| format!("{day} 00:00 does not exist in the local time zone"))?;
    Ok(local.with_timezone(&Utc))
}

/// Plain-text report body; timestamps are shown in `tz`.
pub fn render<Tz: TimeZone>(range: &ReportRange, events: &[RecognitionEvent], generated_at: DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    let tz = generated_at.timezone();
    let rule = "=".repeat(WIDTH);
    let mut out = format!(
        "{rule}\n{:^WIDTH$}\n{rule}\n\nPeriod: {} to {}\nGenerated: {}\n\n",
        "RECOGNITION REPORT",
        range.from,
        range.to,
        generated_at.format("%Y-%m-%d %H:%M:%S"),
    );

    if events.is_empty() {
        out.push_str("No recognitions in this period.\n");
        return out;
    }

    out.push_str(&format!("Recognitions: {}\n", events.len()));
    let separator = "-".repeat(30);
    for event in events {
        out.push_str(&format!(
            "\n{separator}\nName: {}\nNational ID: {}\nEmail: {}\nDate/Time: {}\nConfidence: {:.2}%\n",
            event.name,
            event.national_id,
            event.email,
            event.occurred_at.with_timezone(&tz).format("%Y-%m-%d %H:%M:%S"),
            event.confidence,
        ));
    }
    out
}

/// Write `body` into `dir`, creating it if needed. Returns the file path.
pub fn write(dir: &Path, range: &ReportRange, body: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let path = dir.join(range.file_name());
    std::fs::write(&path, body).with_context(|| format!("writing {}", path.display()))?;
    tracing::info!(path = %path.display(), "report written");
    Ok(path)
}
