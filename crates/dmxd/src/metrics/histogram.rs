use super::counter::render_labels;
use dashmap::DashMap;
use std::fmt::Write as _;

pub const HISTOGRAM_BUCKETS_MS: [f64; 11] = [
    1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0,
];

#[derive(Default)]
struct HistogramState {
    bucket_counts: Vec<u64>,
    sum: f64,
    count: u64,
}

pub struct LabeledHistogram {
    name: &'static str,
    help: &'static str,
    label_names: &'static [&'static str],
    values: DashMap<Vec<String>, HistogramState>,
}

impl LabeledHistogram {
    pub fn new(name: &'static str, help: &'static str, label_names: &'static [&'static str]) -> Self {
        Self {
            name,
            help,
            label_names,
            values: DashMap::new(),
        }
    }

    pub fn observe(&self, label_values: &[&str], value_ms: f64) {
        debug_assert_eq!(label_values.len(), self.label_names.len());
        let key: Vec<String> = label_values.iter().map(|s| s.to_string()).collect();
        let mut entry = self.values.entry(key).or_insert_with(|| HistogramState {
            bucket_counts: vec![0; HISTOGRAM_BUCKETS_MS.len()],
            sum: 0.0,
            count: 0,
        });
        entry.sum += value_ms;
        entry.count += 1;
        for (i, &bound) in HISTOGRAM_BUCKETS_MS.iter().enumerate() {
            if value_ms <= bound {
                entry.bucket_counts[i] += 1;
            }
        }
    }

    pub fn render(&self, prefix: &str, out: &mut String) {
        let full_name = format!("{prefix}_{}", self.name);
        let _ = writeln!(out, "# HELP {full_name} {}", self.help);
        let _ = writeln!(out, "# TYPE {full_name} histogram");
        for entry in self.values.iter() {
            let base_labels = entry.key();
            for (i, &bound) in HISTOGRAM_BUCKETS_MS.iter().enumerate() {
                let mut names: Vec<&str> = self.label_names.to_vec();
                names.push("le");
                let mut values: Vec<String> = base_labels.clone();
                values.push(bound.to_string());
                let labels = render_labels(&names, &values);
                let _ = writeln!(out, "{full_name}_bucket{labels} {}", entry.value().bucket_counts[i]);
            }
            let mut names: Vec<&str> = self.label_names.to_vec();
            names.push("le");
            let mut values: Vec<String> = base_labels.clone();
            values.push("+Inf".to_string());
            let labels = render_labels(&names, &values);
            let _ = writeln!(out, "{full_name}_bucket{labels} {}", entry.value().count);

            let base = render_labels(self.label_names, base_labels);
            let _ = writeln!(out, "{full_name}_sum{base} {}", entry.value().sum);
            let _ = writeln!(out, "{full_name}_count{base} {}", entry.value().count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buckets_are_cumulative() {
        let h = LabeledHistogram::new("x", "help", &[]);
        h.observe(&[], 3.0);
        h.observe(&[], 300.0);
        let mut out = String::new();
        h.render("p", &mut out);
        assert!(out.contains("p_x_count{} 2"));
        assert!(out.contains("p_x_bucket{le=\"+Inf\"} 2"));
    }
}
