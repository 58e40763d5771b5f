//! Scrapes numeric training metrics out of free-form trainer output.

use once_cell::sync::Lazy;
use pl_types::TrialMetrics;
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MetricField {
    Loss,
    Accuracy,
    F1Score,
    Precision,
    Recall,
    Perplexity,
}

impl MetricField {
    fn assign(self, metrics: &mut TrialMetrics, value: f64) {
        match self {
            Self::Loss => metrics.loss = value,
            Self::Accuracy => metrics.accuracy = value,
            Self::F1Score => metrics.f1_score = value,
            Self::Precision => metrics.precision = value,
            Self::Recall => metrics.recall = value,
            Self::Perplexity => metrics.perplexity = Some(value),
        }
    }
}

/// `key[:=]number`, case-insensitive, one entry per field.
static PATTERNS: Lazy<Vec<(Regex, MetricField)>> = Lazy::new(|| {
    [
        (r"(?i)(?:loss|train_loss)[:=]\s*([\d.]+)", MetricField::Loss),
        (r"(?i)(?:accuracy|acc)[:=]\s*([\d.]+)", MetricField::Accuracy),
        (r"(?i)(?:f1|f1_score)[:=]\s*([\d.]+)", MetricField::F1Score),
        (r"(?i)(?:precision|prec)[:=]\s*([\d.]+)", MetricField::Precision),
        (r"(?i)(?:recall|rec)[:=]\s*([\d.]+)", MetricField::Recall),
        (r"(?i)(?:perplexity|ppl)[:=]\s*([\d.]+)", MetricField::Perplexity),
    ]
    .into_iter()
    .map(|(pattern, field)| (Regex::new(pattern).unwrap(), field))
    .collect()
});

/// Extract a metrics record from log lines.
///
/// Every line is checked against every pattern; later matches overwrite
/// earlier ones. Fields never seen stay at zero, except `perplexity` which
/// stays absent.
pub fn extract<I, S>(lines: I) -> TrialMetrics
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut metrics = TrialMetrics::default();
    for line in lines {
        let line = line.as_ref();
        for (regex, field) in PATTERNS.iter() {
            let value = regex
                .captures(line)
                .and_then(|caps| caps.get(1))
                .and_then(|m| leading_number(m.as_str()));
            if let Some(value) = value {
                field.assign(&mut metrics, value);
            }
        }
    }
    metrics
}

/// Parse the longest `digits[.digits]` prefix, so `0.45.` reads as `0.45`.
fn leading_number(raw: &str) -> Option<f64> {
    let end = raw
        .char_indices()
        .filter(|(_, c)| *c == '.')
        .nth(1)
        .map_or(raw.len(), |(i, _)| i);
    raw[..end].parse().ok()
}
