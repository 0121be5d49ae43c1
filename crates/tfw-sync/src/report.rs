use tfw_storage::{ObservationStore, StoreError, TemperatureBucket};

/// Average congestion per temperature band as a Markdown table.
pub fn render_temperature_report(buckets: &[TemperatureBucket]) -> String {
    let mut lines = vec!["# Congestion by temperature".to_string(), String::new()];
    if buckets.is_empty() {
        lines.push("_No hours with both traffic and weather observations yet._".to_string());
        return lines.join("\n");
    }

    lines.push("| temperature | avg jam factor | samples |".to_string());
    lines.push("|---|---:|---:|".to_string());
    for bucket in buckets {
        lines.push(format!(
            "| {} | {:.2} | {} |",
            bucket.label, bucket.avg_jam_factor, bucket.samples
        ));
    }
    lines.join("\n")
}

pub async fn temperature_report(store: &ObservationStore) -> Result<String, StoreError> {
    let buckets = store.temperature_buckets().await?;
    Ok(render_temperature_report(&buckets))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_rows_in_given_order() {
        let buckets = vec![
            TemperatureBucket {
                label: "< 0°C".to_string(),
                avg_jam_factor: 6.4,
                samples: 8,
            },
            TemperatureBucket {
                label: "10–20°C".to_string(),
                avg_jam_factor: 3.0,
                samples: 40,
            },
        ];
        let report = render_temperature_report(&buckets);
        let lines: Vec<&str> = report.lines().collect();
        assert_eq!(lines[0], "# Congestion by temperature");
        assert_eq!(lines[4], "| < 0°C | 6.40 | 8 |");
        assert_eq!(lines[5], "| 10–20°C | 3.00 | 40 |");
    }

    #[test]
    fn empty_join_says_so() {
        assert!(render_temperature_report(&[]).contains("No hours"));
    }
}
