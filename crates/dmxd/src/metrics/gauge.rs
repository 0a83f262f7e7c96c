use super::counter::render_labels;
use dashmap::DashMap;
use std::fmt::Write as _;

pub struct LabeledGauge {
    name: &'static str,
    help: &'static str,
    label_names: &'static [&'static str],
    values: DashMap<Vec<String>, f64>,
}

impl LabeledGauge {
    pub fn new(name: &'static str, help: &'static str, label_names: &'static [&'static str]) -> Self {
        Self {
            name,
            help,
            label_names,
            values: DashMap::new(),
        }
    }

    pub fn set(&self, label_values: &[&str], value: f64) {
        debug_assert_eq!(label_values.len(), self.label_names.len());
        let key: Vec<String> = label_values.iter().map(|s| s.to_string()).collect();
        self.values.insert(key, value);
    }

    pub fn get(&self, label_values: &[&str]) -> f64 {
        let key: Vec<String> = label_values.iter().map(|s| s.to_string()).collect();
        self.values.get(&key).map(|v| *v).unwrap_or(0.0)
    }

    pub fn render(&self, prefix: &str, out: &mut String) {
        let full_name = format!("{prefix}_{}", self.name);
        let _ = writeln!(out, "# HELP {full_name} {}", self.help);
        let _ = writeln!(out, "# TYPE {full_name} gauge");
        for entry in self.values.iter() {
            let labels = render_labels(self.label_names, entry.key());
            let _ = writeln!(out, "{full_name}{labels} {}", entry.value());
        }
    }
}
