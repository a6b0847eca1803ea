use std::collections::BTreeMap;
use std::fmt;

/// Namespace of aggregated cpu values across all cores.
const CPU_AGGREGATE: &str = "aggregation.cpu-average";

/// Cpu fields with a dedicated per-core namespace.
const CPU_FIELDS: &[&str] = &[
    "idle",
    "interrupt",
    "nice",
    "softirq",
    "steal",
    "system",
    "user",
    "wait",
];

/// Memory fields with a dedicated namespace.
const MEMORY_FIELDS: &[&str] = &[
    "buffered",
    "cached",
    "free",
    "slab_recl",
    "slab_unrecl",
    "used",
];

/// Tag holding the identifier of the reporting machine.
pub const MACHINE_ID_TAG: &str = "machine_id";

/// A datapoint renamed into the dotted namespace of a hierarchy store.
#[derive(Clone, Debug, PartialEq)]
pub struct HierarchyMetric {
    /// The dotted namespace replacing the measurement name.
    pub measurement: String,
    /// The renamed field, appended to the namespace.
    pub field: String,
    /// The unchanged value.
    pub value: f64,
    /// Identifier of the reporting machine, taken from the `machine_id` tag.
    pub id: Option<String>,
}

impl HierarchyMetric {
    /// Returns a formatter for a plaintext record of this metric.
    ///
    /// The record has the form `<prefix>.<source_type>.<id>.<measurement>.<field> <value> <secs>`
    /// where spaces in path components are replaced with underscores.
    pub fn record<'a>(
        &'a self,
        prefix: &'a str,
        source_type: &'a str,
        id: &'a str,
        unix_secs: i64,
    ) -> HierarchyRecord<'a> {
        HierarchyRecord {
            metric: self,
            prefix,
            source_type,
            id,
            unix_secs,
        }
    }
}

/// Plaintext representation of a [`HierarchyMetric`], see [`HierarchyMetric::record`].
#[derive(Debug)]
pub struct HierarchyRecord<'a> {
    metric: &'a HierarchyMetric,
    prefix: &'a str,
    source_type: &'a str,
    id: &'a str,
    unix_secs: i64,
}

impl fmt::Display for HierarchyRecord<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path: [&str; 5] = [
            self.prefix,
            self.source_type,
            self.id,
            &self.metric.measurement,
            &self.metric.field,
        ];

        for (index, segment) in path.iter().filter(|s| !s.is_empty()).enumerate() {
            if index > 0 {
                f.write_str(".")?;
            }
            for c in segment.chars() {
                match c {
                    c if c.is_whitespace() => f.write_str("_")?,
                    c => fmt::Write::write_char(f, c)?,
                }
            }
        }

        write!(f, " {} {}", self.metric.value, self.unix_secs)
    }
}

/// Maps a datapoint onto the dotted namespace of a hierarchy store.
///
/// Returns `None` if the datapoint should be dropped, for instance because a tag that is needed
/// for the namespace is missing or malformed. Measurements without a rule pass through with their
/// name and field unchanged.
///
/// | measurement | namespace                                        | field                    |
/// |-------------|--------------------------------------------------|--------------------------|
/// | `cpu`       | `cpu.<n>`, `cpu_extra.<n>`, or `aggregation.cpu-average` | without `usage_` prefix |
/// | `disk`      | `df.<device>.df_complex`                         | unchanged                |
/// | `diskio`    | `disk.<name>.disk_time`, `disk.<name>.disk_octets`, or `disk_extra.<name>` | `read`, `write` |
/// | `net`       | `interface.<interface>.if_octets` and friends    | `rx`, `tx`               |
/// | `mem`       | `memory` or `memory_extra`                       | unchanged                |
/// | `system`    | `load` for load averages                         | `shortterm`, `midterm`, `longterm` |
/// | `swap`      | unchanged                                        | `swap_io.in`, `swap_io.out` |
///
/// # Example
///
/// ```
/// use std::collections::BTreeMap;
/// use relay_metrics::translate;
///
/// let tags = BTreeMap::from([("cpu".to_owned(), "cpu3".to_owned())]);
/// let metric = translate("cpu", &tags, "usage_iowait", 0.5).unwrap();
///
/// assert_eq!(metric.measurement, "cpu.3");
/// assert_eq!(metric.field, "wait");
/// ```
pub fn translate(
    measurement: &str,
    tags: &BTreeMap<String, String>,
    field: &str,
    value: f64,
) -> Option<HierarchyMetric> {
    let tag = |key: &str| tags.get(key).map(String::as_str);

    let (measurement, field) = match measurement {
        "cpu" => translate_cpu(tag("cpu")?, field)?,
        "disk" => (format!("df.{}.df_complex", tag("device")?), field.to_owned()),
        "diskio" => translate_diskio(tag("name")?, field),
        "net" => translate_net(tag("interface")?, field)?,
        "mem" => translate_mem(field),
        "system" => translate_system(field),
        "swap" => translate_swap(field),
        other => (other.to_owned(), field.to_owned()),
    };

    Some(HierarchyMetric {
        measurement,
        field,
        value,
        id: tag(MACHINE_ID_TAG).map(str::to_owned),
    })
}

/// Extracts the core index or `total` from a `cpu` tag such as `cpu0` or `cpu-total`.
fn cpu_suffix(tag: &str) -> Option<&str> {
    let rest = tag.strip_prefix("cpu")?;
    let suffix = rest.strip_prefix('-').unwrap_or(rest);

    let valid = suffix == "total"
        || (!suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()));

    valid.then_some(suffix)
}

fn translate_cpu(tag: &str, field: &str) -> Option<(String, String)> {
    let suffix = cpu_suffix(tag)?;

    let field = field.strip_prefix("usage_").unwrap_or(field);
    let field = match field {
        "iowait" => "wait",
        "irq" => "interrupt",
        other => other,
    };

    let namespace = if suffix == "total" {
        CPU_AGGREGATE.to_owned()
    } else if CPU_FIELDS.contains(&field) {
        format!("cpu.{suffix}")
    } else {
        format!("cpu_extra.{suffix}")
    };

    Some((namespace, field.to_owned()))
}

fn translate_diskio(name: &str, field: &str) -> (String, String) {
    let (sub, field) = match field {
        "read_time" => ("disk_time", "read"),
        "write_time" => ("disk_time", "write"),
        "read_bytes" => ("disk_octets", "read"),
        "write_bytes" => ("disk_octets", "write"),
        other => return (format!("disk_extra.{name}"), other.to_owned()),
    };

    (format!("disk.{name}.{sub}"), field.to_owned())
}

fn translate_net(interface: &str, field: &str) -> Option<(String, String)> {
    if interface == "all" {
        return None;
    }

    let (sub, field) = match field {
        "bytes_recv" => ("if_octets", "rx"),
        "bytes_sent" => ("if_octets", "tx"),
        "packets_recv" => ("if_packets", "rx"),
        "packets_sent" => ("if_packets", "tx"),
        "err_in" => ("if_errors", "rx"),
        "err_out" => ("if_errors", "tx"),
        other => return Some((format!("interface.{interface}"), other.to_owned())),
    };

    Some((format!("interface.{interface}.{sub}"), field.to_owned()))
}

fn translate_mem(field: &str) -> (String, String) {
    let namespace = if MEMORY_FIELDS.contains(&field) {
        "memory"
    } else {
        "memory_extra"
    };

    (namespace.to_owned(), field.to_owned())
}

fn translate_system(field: &str) -> (String, String) {
    match field {
        "load1" => ("load".to_owned(), "shortterm".to_owned()),
        "load5" => ("load".to_owned(), "midterm".to_owned()),
        "load15" => ("load".to_owned(), "longterm".to_owned()),
        other => ("system".to_owned(), other.to_owned()),
    }
}

fn translate_swap(field: &str) -> (String, String) {
    let field = match field {
        "in" => "swap_io.in",
        "out" => "swap_io.out",
        other => other,
    };

    ("swap".to_owned(), field.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    /// Returns `(measurement, field)` of the translated metric.
    fn names(
        measurement: &str,
        tags: &BTreeMap<String, String>,
        field: &str,
    ) -> Option<(String, String)> {
        translate(measurement, tags, field, 1.0).map(|m| (m.measurement, m.field))
    }

    fn pair(measurement: &str, field: &str) -> Option<(String, String)> {
        Some((measurement.to_owned(), field.to_owned()))
    }

    #[test]
    fn test_cpu_per_core() {
        let t = tags(&[("cpu", "cpu0")]);
        assert_eq!(names("cpu", &t, "usage_idle"), pair("cpu.0", "idle"));
        assert_eq!(names("cpu", &t, "usage_iowait"), pair("cpu.0", "wait"));
        assert_eq!(names("cpu", &t, "usage_irq"), pair("cpu.0", "interrupt"));
        assert_eq!(names("cpu", &t, "usage_guest"), pair("cpu_extra.0", "guest"));
        assert_eq!(names("cpu", &t, "time_user"), pair("cpu_extra.0", "time_user"));

        let t = tags(&[("cpu", "cpu12")]);
        assert_eq!(names("cpu", &t, "usage_softirq"), pair("cpu.12", "softirq"));
    }

    #[test]
    fn test_cpu_total_is_aggregated() {
        let t = tags(&[("cpu", "cpu-total")]);
        assert_eq!(
            names("cpu", &t, "usage_idle"),
            pair("aggregation.cpu-average", "idle")
        );
        assert_eq!(
            names("cpu", &t, "usage_guest"),
            pair("aggregation.cpu-average", "guest")
        );
    }

    #[test]
    fn test_cpu_malformed_tag_drops() {
        assert_eq!(names("cpu", &tags(&[]), "usage_idle"), None);
        assert_eq!(names("cpu", &tags(&[("cpu", "gpu0")]), "usage_idle"), None);
        assert_eq!(names("cpu", &tags(&[("cpu", "cpu")]), "usage_idle"), None);
        assert_eq!(names("cpu", &tags(&[("cpu", "cpu-x1")]), "usage_idle"), None);
    }

    #[test]
    fn test_disk() {
        let t = tags(&[("device", "sda1"), ("path", "/")]);
        assert_eq!(names("disk", &t, "used"), pair("df.sda1.df_complex", "used"));
        assert_eq!(names("disk", &tags(&[]), "used"), None);
    }

    #[test]
    fn test_diskio() {
        let t = tags(&[("name", "sda")]);
        assert_eq!(names("diskio", &t, "read_time"), pair("disk.sda.disk_time", "read"));
        assert_eq!(names("diskio", &t, "write_time"), pair("disk.sda.disk_time", "write"));
        assert_eq!(names("diskio", &t, "read_bytes"), pair("disk.sda.disk_octets", "read"));
        assert_eq!(names("diskio", &t, "write_bytes"), pair("disk.sda.disk_octets", "write"));
        assert_eq!(
            names("diskio", &t, "iops_in_progress"),
            pair("disk_extra.sda", "iops_in_progress")
        );
    }

    #[test]
    fn test_net() {
        let t = tags(&[("interface", "eth0")]);
        assert_eq!(names("net", &t, "bytes_recv"), pair("interface.eth0.if_octets", "rx"));
        assert_eq!(names("net", &t, "bytes_sent"), pair("interface.eth0.if_octets", "tx"));
        assert_eq!(names("net", &t, "packets_recv"), pair("interface.eth0.if_packets", "rx"));
        assert_eq!(names("net", &t, "packets_sent"), pair("interface.eth0.if_packets", "tx"));
        assert_eq!(names("net", &t, "err_in"), pair("interface.eth0.if_errors", "rx"));
        assert_eq!(names("net", &t, "err_out"), pair("interface.eth0.if_errors", "tx"));
        assert_eq!(names("net", &t, "drop_in"), pair("interface.eth0", "drop_in"));
    }

    #[test]
    fn test_net_all_drops() {
        let t = tags(&[("interface", "all")]);
        for field in ["bytes_recv", "err_out", "icmp_inmsgs", "anything"] {
            assert_eq!(names("net", &t, field), None);
        }
    }

    #[test]
    fn test_mem() {
        let t = tags(&[]);
        assert_eq!(names("mem", &t, "used"), pair("memory", "used"));
        assert_eq!(names("mem", &t, "slab_recl"), pair("memory", "slab_recl"));
        assert_eq!(
            names("mem", &t, "available_percent"),
            pair("memory_extra", "available_percent")
        );
    }

    #[test]
    fn test_system() {
        let t = tags(&[]);
        assert_eq!(names("system", &t, "load1"), pair("load", "shortterm"));
        assert_eq!(names("system", &t, "load5"), pair("load", "midterm"));
        assert_eq!(names("system", &t, "load15"), pair("load", "longterm"));
        assert_eq!(names("system", &t, "uptime"), pair("system", "uptime"));
    }

    #[test]
    fn test_swap() {
        let t = tags(&[]);
        assert_eq!(names("swap", &t, "in"), pair("swap", "swap_io.in"));
        assert_eq!(names("swap", &t, "out"), pair("swap", "swap_io.out"));
        assert_eq!(names("swap", &t, "used"), pair("swap", "used"));
    }

    #[test]
    fn test_unknown_measurement_is_fixed_point() {
        let t = tags(&[("machine_id", "m-1"), ("host", "a")]);
        let first = translate("nginx", &t, "requests", 42.0).unwrap();
        assert_eq!(first.measurement, "nginx");
        assert_eq!(first.field, "requests");
        assert_eq!(first.value, 42.0);
        assert_eq!(first.id.as_deref(), Some("m-1"));

        let second = translate(&first.measurement, &t, &first.field, first.value).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_record() {
        let metric = translate("system", &tags(&[]), "load1", 0.25).unwrap();
        insta::assert_snapshot!(
            metric.record("bucky", "unix", "m-1", 1_600_000_000).to_string(),
            @"bucky.unix.m-1.load.shortterm 0.25 1600000000"
        );

        let metric = translate("win perf", &tags(&[]), "free bytes", 3.0).unwrap();
        insta::assert_snapshot!(
            metric.record("bucky", "windows", "", 1).to_string(),
            @"bucky.windows.win_perf.free_bytes 3 1"
        );
    }
}
