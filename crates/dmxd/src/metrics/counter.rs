use dashmap::DashMap;
use std::fmt::Write as _;

pub struct LabeledCounter {
    name: &'static str,
    help: &'static str,
    label_names: &'static [&'static str],
    values: DashMap<Vec<String>, u64>,
}

impl LabeledCounter {
    pub fn new(name: &'static str, help: &'static str, label_names: &'static [&'static str]) -> Self {
        Self {
            name,
            help,
            label_names,
            values: DashMap::new(),
        }
    }

    pub fn inc(&self, label_values: &[&str]) {
        self.inc_by(label_values, 1);
    }

    pub fn inc_by(&self, label_values: &[&str], delta: u64) {
        debug_assert_eq!(label_values.len(), self.label_names.len());
        let key: Vec<String> = label_values.iter().map(|s| s.to_string()).collect();
        *self.values.entry(key).or_insert(0) += delta;
    }

    pub fn get(&self, label_values: &[&str]) -> u64 {
        let key: Vec<String> = label_values.iter().map(|s| s.to_string()).collect();
        self.values.get(&key).map(|v| *v).unwrap_or(0)
    }

    pub fn render(&self, prefix: &str, out: &mut String) {
        let full_name = format!("{prefix}_{}", self.name);
        let _ = writeln!(out, "# HELP {full_name} {}", self.help);
        let _ = writeln!(out, "# TYPE {full_name} counter");
        for entry in self.values.iter() {
            let labels = render_labels(self.label_names, entry.key());
            let _ = writeln!(out, "{full_name}{labels} {}", entry.value());
        }
    }
}

pub(super) fn render_labels(names: &[&str], values: &[String]) -> String {
    if names.is_empty() {
        return String::new();
    }
    let mut pairs = Vec::with_capacity(names.len());
    for (name, value) in names.iter().zip(values.iter()) {
        pairs.push(format!("{name}=\"{value}\""));
    }
    format!("{{{}}}", pairs.join(","))
}
