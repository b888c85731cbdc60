//! Best-effort host facts for enrollment, inventory and metrics.
//!
//! Collection is operational:
//! - works without elevated privileges where possible,
//! - captures only values observable from user space,
//! - leaves unavailable values as `null` rather than guessing.

use std::collections::{BTreeMap, BTreeSet};
#[cfg(unix)]
use std::ffi::{CStr, CString};
#[cfg(target_os = "macos")]
use std::io::Read;
#[cfg(unix)]
use std::net::{Ipv4Addr, Ipv6Addr};
#[cfg(target_os = "linux")]
use std::path::Path;
#[cfg(target_os = "macos")]
use std::process::Stdio;
use std::time::Duration;
#[cfg(target_os = "macos")]
use std::time::Instant;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::policy::{HostIdentity, SystemIdentity};

/// Source of the facts sent at enrollment and inventory time.
pub trait FactsSource {
    /// Identity subset used to fingerprint the device at enrollment.
    fn minimal_facts(&self) -> Value;
    /// Complete inventory document.
    fn full_facts(&self) -> Value;
}

/// Source of periodic metric samples.
pub trait MetricsSampler {
    fn sample(&self) -> Value;
}

// ---------------------------------------------------------------------------
// Fact model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct OsBasics {
    pub name: String,
    pub version: Option<String>,
    pub release: Option<String>,
    pub arch: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserInfo {
    pub primary: Option<String>,
    pub domain: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HardwareIds {
    pub uuid: Option<String>,
    pub serial: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CpuBasics {
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryBasics {
    pub total_bytes: Option<u64>,
}

/// Identity subset, cheap to collect.
#[derive(Debug, Clone, Serialize)]
pub struct MinimalFacts {
    pub hostname: Option<String>,
    pub os: OsBasics,
    pub cpu: CpuBasics,
    pub memory: MemoryBasics,
    pub user: UserInfo,
    pub hardware: HardwareIds,
}

#[derive(Debug, Clone, Serialize)]
pub struct OsDetails {
    #[serde(flatten)]
    pub basics: OsBasics,
    pub build: Option<String>,
    pub product: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CpuDetails {
    pub count: usize,
    pub name: Option<String>,
    pub physical_cores: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryDetails {
    pub total_bytes: Option<u64>,
    pub available_bytes: Option<u64>,
    pub percent: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiskInfo {
    pub device: String,
    pub mountpoint: String,
    pub fstype: String,
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub free_bytes: u64,
    pub percent: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StorageInfo {
    pub disks: Vec<DiskInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NetInterface {
    pub name: String,
    pub mac: Option<String>,
    pub ipv4: Vec<String>,
    pub ipv6: Vec<String>,
    pub is_up: Option<bool>,
    pub mtu: Option<u32>,
    pub speed_mbps: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NetworkInfo {
    pub hostname: Option<String>,
    pub domain: Option<String>,
    pub interfaces: Vec<NetInterface>,
}

/// Full inventory document.
#[derive(Debug, Clone, Serialize)]
pub struct FullFacts {
    pub hostname: Option<String>,
    pub os: OsDetails,
    pub cpu: CpuDetails,
    pub memory: MemoryDetails,
    pub user: UserInfo,
    pub hardware: HardwareIds,
    pub storage: StorageInfo,
    pub network: NetworkInfo,
    pub collected_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryUsage {
    pub used_bytes: Option<u64>,
    pub total_bytes: Option<u64>,
    pub percent: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiskUsage {
    pub total_bytes: Option<u64>,
    pub used_bytes: Option<u64>,
    pub percent: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadAverage {
    pub one: Option<f64>,
    pub five: Option<f64>,
    pub fifteen: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Sessions {
    pub active_user: Option<String>,
    pub users: Vec<String>,
    pub hostname: Option<String>,
}

/// One periodic metrics sample.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSample {
    pub timestamp: i64,
    pub collected_at: String,
    pub cpu_percent: Option<f64>,
    pub memory: MemoryUsage,
    pub process_count: Option<u64>,
    pub uptime_seconds: Option<u64>,
    pub disk_root: DiskUsage,
    pub loadavg: LoadAverage,
    pub sessions: Sessions,
}

// ---------------------------------------------------------------------------
// Collector
// ---------------------------------------------------------------------------

/// Collects facts from the running host.
#[derive(Debug, Clone)]
pub struct SystemFacts {
    /// Gap between the two CPU counter reads used for `cpu_percent`.
    pub cpu_window: Duration,
}

impl Default for SystemFacts {
    fn default() -> Self {
        Self {
            cpu_window: Duration::from_millis(300),
        }
    }
}

impl SystemFacts {
    pub fn collect_minimal(&self) -> MinimalFacts {
        let (total, _) = memory_totals();
        MinimalFacts {
            hostname: hostname(),
            os: os_basics(),
            cpu: CpuBasics { count: cpu_count() },
            memory: MemoryBasics { total_bytes: total },
            user: UserInfo {
                primary: primary_user(),
                domain: SystemIdentity.domain(),
            },
            hardware: hardware_ids(),
        }
    }

    pub fn collect_full(&self) -> FullFacts {
        let minimal = self.collect_minimal();
        let (total, available) = memory_totals();
        let (build, product) = os_build_and_product();

        FullFacts {
            hostname: minimal.hostname.clone(),
            os: OsDetails {
                basics: minimal.os,
                build,
                product,
            },
            cpu: CpuDetails {
                count: minimal.cpu.count,
                name: cpu_name(),
                physical_cores: physical_cores(),
            },
            memory: MemoryDetails {
                total_bytes: total,
                available_bytes: available,
                percent: used_percent(total, available),
            },
            storage: StorageInfo { disks: disks() },
            network: NetworkInfo {
                hostname: minimal.hostname.clone(),
                domain: minimal.user.domain.clone(),
                interfaces: interfaces(),
            },
            user: minimal.user,
            hardware: minimal.hardware,
            collected_at: now_rfc3339(),
        }
    }

    pub fn collect_sample(&self) -> MetricsSample {
        let now = Utc::now();
        let (total, available) = memory_totals();
        let used = match (total, available) {
            (Some(t), Some(a)) => Some(t.saturating_sub(a)),
            _ => None,
        };
        let root = disk_usage("/");
        let (one, five, fifteen) = collect_loadavg();
        let host = hostname();

        MetricsSample {
            timestamp: now.timestamp(),
            collected_at: now.to_rfc3339_opts(SecondsFormat::Secs, true),
            cpu_percent: cpu_percent(self.cpu_window),
            memory: MemoryUsage {
                used_bytes: used,
                total_bytes: total,
                percent: used_percent(total, available),
            },
            process_count: process_count(),
            uptime_seconds: uptime_seconds(),
            disk_root: DiskUsage {
                total_bytes: root.map(|u| u.total),
                used_bytes: root.map(|u| u.used),
                percent: root.map(|u| u.percent()),
            },
            loadavg: LoadAverage { one, five, fifteen },
            sessions: Sessions {
                active_user: primary_user(),
                users: logged_in_users(),
                hostname: host,
            },
        }
    }
}

impl FactsSource for SystemFacts {
    fn minimal_facts(&self) -> Value {
        serde_json::to_value(self.collect_minimal()).unwrap_or(Value::Null)
    }

    fn full_facts(&self) -> Value {
        serde_json::to_value(self.collect_full()).unwrap_or(Value::Null)
    }
}

impl MetricsSampler for SystemFacts {
    fn sample(&self) -> Value {
        serde_json::to_value(self.collect_sample()).unwrap_or(Value::Null)
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn used_percent(total: Option<u64>, available: Option<u64>) -> Option<f64> {
    match (total, available) {
        (Some(t), Some(a)) if t > 0 => {
            let pct = t.saturating_sub(a) as f64 / t as f64 * 100.0;
            Some((pct * 10.0).round() / 10.0)
        }
        _ => None,
    }
}

fn cpu_count() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZero::get)
        .unwrap_or(1)
}

fn primary_user() -> Option<String> {
    ["USER", "USERNAME", "LOGNAME"]
        .iter()
        .find_map(|k| std::env::var(k).ok().filter(|v| !v.is_empty()))
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Short or fully-qualified host name as the OS reports it.
pub fn hostname() -> Option<String> {
    #[cfg(unix)]
    {
        let mut buf = [0u8; 256];
        // SAFETY: `gethostname` writes at most `buf.len()` bytes into a valid buffer.
        let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };
        if rc != 0 {
            return None;
        }
        let end = buf.iter().position(|b| *b == 0).unwrap_or(buf.len());
        let name = String::from_utf8_lossy(&buf[..end]).trim().to_string();
        (!name.is_empty()).then_some(name)
    }
    #[cfg(not(unix))]
    {
        std::env::var("COMPUTERNAME").ok().filter(|v| !v.is_empty())
    }
}

/// DNS domain of this host: the suffix of a fully-qualified host name, or
/// the `domain`/`search` entry of the resolver configuration.
pub fn dns_domain() -> Option<String> {
    let fqdn_suffix = hostname().and_then(|h| {
        h.split_once('.')
            .map(|(_, d)| d.to_string())
            .filter(|d| !d.is_empty())
    });
    if fqdn_suffix.is_some() {
        return fqdn_suffix;
    }
    #[cfg(unix)]
    {
        std::fs::read_to_string("/etc/resolv.conf")
            .ok()
            .and_then(|raw| parse_resolv_domain(&raw))
    }
    #[cfg(not(unix))]
    {
        None
    }
}

#[cfg_attr(not(unix), allow(dead_code))]
fn parse_resolv_domain(raw: &str) -> Option<String> {
    let mut search = None;
    for line in raw.lines() {
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("domain") => {
                if let Some(d) = parts.next() {
                    return Some(d.to_string());
                }
            }
            Some("search") if search.is_none() => {
                search = parts.next().filter(|d| *d != ".").map(str::to_string);
            }
            _ => {}
        }
    }
    search
}

#[cfg(unix)]
fn c_field(raw: &[libc::c_char]) -> String {
    let bytes: Vec<u8> = raw
        .iter()
        .take_while(|c| **c != 0)
        .map(|c| *c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).trim().to_string()
}

fn os_basics() -> OsBasics {
    #[cfg(unix)]
    {
        // SAFETY: `utsname` is plain old data; all-zero is a valid value.
        let mut u: libc::utsname = unsafe { std::mem::zeroed() };
        // SAFETY: `uname` fills the struct we own.
        if unsafe { libc::uname(&mut u) } == 0 {
            let opt = |raw: &[libc::c_char]| Some(c_field(raw)).filter(|s| !s.is_empty());
            return OsBasics {
                name: c_field(&u.sysname),
                version: opt(&u.version),
                release: opt(&u.release),
                arch: opt(&u.machine).unwrap_or_else(|| std::env::consts::ARCH.to_string()),
            };
        }
    }
    OsBasics {
        name: platform_name().to_string(),
        version: None,
        release: None,
        arch: std::env::consts::ARCH.to_string(),
    }
}

fn platform_name() -> &'static str {
    match std::env::consts::OS {
        "windows" => "Windows",
        "macos" => "Darwin",
        "linux" => "Linux",
        other => other,
    }
}

fn os_build_and_product() -> (Option<String>, Option<String>) {
    #[cfg(target_os = "linux")]
    {
        let Ok(raw) = std::fs::read_to_string("/etc/os-release") else {
            return (None, None);
        };
        let fields = parse_os_release(&raw);
        (
            fields.get("VERSION_ID").cloned(),
            fields
                .get("PRETTY_NAME")
                .or_else(|| fields.get("NAME"))
                .cloned(),
        )
    }
    #[cfg(target_os = "macos")]
    {
        let build = run_command("sw_vers", &["-buildVersion"]);
        let product = match (
            run_command("sw_vers", &["-productName"]),
            run_command("sw_vers", &["-productVersion"]),
        ) {
            (Some(name), Some(ver)) => Some(format!("{name} {ver}")),
            (name, _) => name,
        };
        (build, product)
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        (None, None)
    }
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_os_release(raw: &str) -> BTreeMap<String, String> {
    raw.lines()
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| {
            (
                k.trim().to_string(),
                v.trim().trim_matches('"').trim_matches('\'').to_string(),
            )
        })
        .filter(|(_, v)| !v.is_empty())
        .collect()
}

fn hardware_ids() -> HardwareIds {
    #[cfg(target_os = "linux")]
    {
        let dmi = Path::new("/sys/class/dmi/id");
        HardwareIds {
            uuid: read_trimmed(&dmi.join("product_uuid")),
            serial: read_trimmed(&dmi.join("product_serial"))
                .or_else(|| read_trimmed(&dmi.join("board_serial"))),
        }
    }
    #[cfg(target_os = "macos")]
    {
        let raw = run_command("ioreg", &["-rd1", "-c", "IOPlatformExpertDevice"]);
        HardwareIds {
            uuid: raw.as_deref().and_then(|r| parse_ioreg_value(r, "IOPlatformUUID")),
            serial: raw
                .as_deref()
                .and_then(|r| parse_ioreg_value(r, "IOPlatformSerialNumber")),
        }
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        HardwareIds {
            uuid: None,
            serial: None,
        }
    }
}

#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
fn parse_ioreg_value(raw: &str, key: &str) -> Option<String> {
    let needle = format!("\"{key}\"");
    raw.lines()
        .find(|l| l.contains(&needle))
        .and_then(|l| l.split_once('='))
        .map(|(_, v)| v.trim().trim_matches('"').to_string())
        .filter(|v| !v.is_empty())
}

// ---------------------------------------------------------------------------
// CPU / memory
// ---------------------------------------------------------------------------

fn cpu_name() -> Option<String> {
    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/proc/cpuinfo").ok().and_then(|s| {
            s.lines()
                .find(|l| l.starts_with("model name") || l.starts_with("Hardware"))
                .and_then(|l| l.split_once(':'))
                .map(|(_, v)| v.trim().to_string())
        })
    }
    #[cfg(target_os = "macos")]
    {
        read_sysctl("machdep.cpu.brand_string")
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

fn physical_cores() -> Option<usize> {
    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/proc/cpuinfo")
            .ok()
            .and_then(|raw| count_physical_cores(&raw))
    }
    #[cfg(target_os = "macos")]
    {
        read_sysctl("hw.physicalcpu").and_then(|v| v.parse().ok())
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

/// Distinct `(physical id, core id)` pairs in `/proc/cpuinfo`.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn count_physical_cores(raw: &str) -> Option<usize> {
    let mut cores = BTreeSet::new();
    let mut physical = String::new();
    for line in raw.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        match key.trim() {
            "physical id" => physical = value.trim().to_string(),
            "core id" => {
                cores.insert((physical.clone(), value.trim().to_string()));
            }
            _ => {}
        }
    }
    (!cores.is_empty()).then_some(cores.len())
}

/// `(total, available)` physical memory in bytes.
fn memory_totals() -> (Option<u64>, Option<u64>) {
    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/proc/meminfo")
            .map(|raw| parse_meminfo(&raw))
            .unwrap_or((None, None))
    }
    #[cfg(target_os = "macos")]
    {
        (read_sysctl("hw.memsize").and_then(|v| v.parse().ok()), None)
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        (None, None)
    }
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_meminfo(raw: &str) -> (Option<u64>, Option<u64>) {
    let mut total = None;
    let mut available = None;
    for line in raw.lines() {
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        let Some(kib) = rest
            .split_whitespace()
            .next()
            .and_then(|v| v.parse::<u64>().ok())
        else {
            continue;
        };
        match key {
            "MemTotal" => total = Some(kib * 1024),
            "MemAvailable" => available = Some(kib * 1024),
            _ => {}
        }
    }
    (total, available)
}

/// `(idle, total)` jiffies from the aggregate `cpu` line of `/proc/stat`.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_cpu_times(raw: &str) -> Option<(u64, u64)> {
    let line = raw.lines().find(|l| l.starts_with("cpu "))?;
    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .filter_map(|v| v.parse().ok())
        .collect();
    if fields.len() < 4 {
        return None;
    }
    let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
    // guest and guest_nice are already folded into user and nice
    let total = fields.iter().take(8).sum();
    Some((idle, total))
}

fn cpu_percent(window: Duration) -> Option<f64> {
    #[cfg(target_os = "linux")]
    {
        let read = || {
            std::fs::read_to_string("/proc/stat")
                .ok()
                .and_then(|raw| parse_cpu_times(&raw))
        };
        let (idle0, total0) = read()?;
        std::thread::sleep(window);
        let (idle1, total1) = read()?;
        let dt = total1.saturating_sub(total0);
        if dt == 0 {
            return Some(0.0);
        }
        let busy = dt.saturating_sub(idle1.saturating_sub(idle0));
        Some(((busy as f64 / dt as f64) * 1000.0).round() / 10.0)
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = window;
        None
    }
}

fn collect_loadavg() -> (Option<f64>, Option<f64>, Option<f64>) {
    #[cfg(unix)]
    {
        let mut values = [0.0_f64; 3];
        // SAFETY: `getloadavg` writes up to `n` doubles to a valid buffer.
        let n = unsafe { libc::getloadavg(values.as_mut_ptr(), 3) };
        if n <= 0 {
            (None, None, None)
        } else {
            (
                Some(values[0]),
                (n > 1).then_some(values[1]),
                (n > 2).then_some(values[2]),
            )
        }
    }
    #[cfg(not(unix))]
    {
        (None, None, None)
    }
}

fn process_count() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        let entries = std::fs::read_dir("/proc").ok()?;
        let n = entries
            .filter_map(Result::ok)
            .filter(|e| {
                e.file_name()
                    .to_str()
                    .is_some_and(|n| n.bytes().all(|b| b.is_ascii_digit()))
            })
            .count();
        Some(n as u64)
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

fn uptime_seconds() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        read_first_f64(Path::new("/proc/uptime")).map(|v| v as u64)
    }
    #[cfg(target_os = "macos")]
    {
        // "{ sec = 1700000000, usec = 0 } Tue Nov ..."
        let raw = read_sysctl("kern.boottime")?;
        let boot: i64 = raw
            .split("sec =")
            .nth(1)?
            .split(',')
            .next()?
            .trim()
            .parse()
            .ok()?;
        Some(Utc::now().timestamp().saturating_sub(boot).max(0) as u64)
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

fn logged_in_users() -> Vec<String> {
    #[cfg(any(all(target_os = "linux", target_env = "gnu"), target_os = "macos"))]
    {
        let mut users = BTreeSet::new();
        // SAFETY: the utmpx iterator is process-global; collection happens
        // on one thread and each entry is copied out before the next call.
        unsafe {
            libc::setutxent();
            loop {
                let entry = libc::getutxent();
                if entry.is_null() {
                    break;
                }
                let e = &*entry;
                if e.ut_type == libc::USER_PROCESS {
                    let name = c_field(&e.ut_user);
                    if !name.is_empty() {
                        users.insert(name);
                    }
                }
            }
            libc::endutxent();
        }
        users.into_iter().collect()
    }
    #[cfg(not(any(all(target_os = "linux", target_env = "gnu"), target_os = "macos")))]
    {
        primary_user().into_iter().collect()
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

const PSEUDO_FILESYSTEMS: &[&str] = &[
    "autofs",
    "binfmt_misc",
    "bpf",
    "cgroup",
    "cgroup2",
    "configfs",
    "debugfs",
    "devfs",
    "devpts",
    "devtmpfs",
    "efivarfs",
    "fusectl",
    "hugetlbfs",
    "mqueue",
    "nsfs",
    "proc",
    "pstore",
    "ramfs",
    "rpc_pipefs",
    "securityfs",
    "selinuxfs",
    "squashfs",
    "sysfs",
    "tmpfs",
    "tracefs",
];

#[derive(Debug, Clone, Copy, PartialEq)]
struct Usage {
    total: u64,
    used: u64,
    free: u64,
}

impl Usage {
    fn percent(self) -> f64 {
        let denom = self.used + self.free;
        if denom == 0 {
            return 0.0;
        }
        ((self.used as f64 / denom as f64) * 1000.0).round() / 10.0
    }
}

fn disk_usage(path: &str) -> Option<Usage> {
    #[cfg(unix)]
    {
        let c_path = CString::new(path).ok()?;
        // SAFETY: `statvfs` is plain old data; all-zero is a valid value.
        let mut st: libc::statvfs = unsafe { std::mem::zeroed() };
        // SAFETY: valid NUL-terminated path and a struct we own.
        if unsafe { libc::statvfs(c_path.as_ptr(), &mut st) } != 0 {
            return None;
        }
        let frsize = st.f_frsize as u64;
        let blocks = st.f_blocks as u64;
        let bfree = st.f_bfree as u64;
        let bavail = st.f_bavail as u64;
        Some(Usage {
            total: blocks * frsize,
            used: blocks.saturating_sub(bfree) * frsize,
            free: bavail * frsize,
        })
    }
    #[cfg(not(unix))]
    {
        let _ = path;
        None
    }
}

/// `(device, mountpoint, fstype)` for every real filesystem in a
/// `/proc/mounts` style listing, first mount of each mountpoint wins.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_mounts(raw: &str) -> Vec<(String, String, String)> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for line in raw.lines() {
        let mut parts = line.split_whitespace();
        let (Some(device), Some(mountpoint), Some(fstype)) =
            (parts.next(), parts.next(), parts.next())
        else {
            continue;
        };
        if PSEUDO_FILESYSTEMS.contains(&fstype) {
            continue;
        }
        let mountpoint = unescape_mount(mountpoint);
        if seen.insert(mountpoint.clone()) {
            out.push((device.to_string(), mountpoint, fstype.to_string()));
        }
    }
    out
}

/// Undo the octal escaping (`\040` for space) used in `/proc/mounts`.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn unescape_mount(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            if let Some(v) = raw
                .get(i + 1..i + 4)
                .and_then(|oct| u8::from_str_radix(oct, 8).ok())
            {
                out.push(v);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn disks() -> Vec<DiskInfo> {
    #[cfg(target_os = "linux")]
    let mounts = std::fs::read_to_string("/proc/mounts")
        .map(|raw| parse_mounts(&raw))
        .unwrap_or_default();
    #[cfg(not(target_os = "linux"))]
    let mounts = vec![(String::new(), "/".to_string(), String::new())];

    let mut disks: Vec<DiskInfo> = mounts
        .into_iter()
        .filter_map(|(device, mountpoint, fstype)| {
            let usage = disk_usage(&mountpoint)?;
            if usage.total == 0 {
                return None;
            }
            Some(DiskInfo {
                percent: usage.percent(),
                device,
                mountpoint,
                fstype,
                total_bytes: usage.total,
                used_bytes: usage.used,
                free_bytes: usage.free,
            })
        })
        .collect();
    disks.sort_by(|a, b| a.mountpoint.cmp(&b.mountpoint));
    disks
}

// ---------------------------------------------------------------------------
// Network
// ---------------------------------------------------------------------------

fn interfaces() -> Vec<NetInterface> {
    #[cfg(unix)]
    {
        let mut by_name: BTreeMap<String, NetInterface> = BTreeMap::new();
        let mut ifap: *mut libc::ifaddrs = std::ptr::null_mut();
        // SAFETY: on success `getifaddrs` hands us a list freed below.
        if unsafe { libc::getifaddrs(&mut ifap) } != 0 {
            return Vec::new();
        }
        let mut cur = ifap;
        while !cur.is_null() {
            // SAFETY: `cur` is a live node of the list returned above.
            let ifa = unsafe { &*cur };
            cur = ifa.ifa_next;
            if ifa.ifa_name.is_null() {
                continue;
            }
            // SAFETY: non-null, NUL-terminated interface name.
            let name = unsafe { CStr::from_ptr(ifa.ifa_name) }
                .to_string_lossy()
                .into_owned();
            let entry = by_name
                .entry(name.clone())
                .or_insert_with(|| NetInterface {
                    name,
                    ..NetInterface::default()
                });
            entry.is_up = Some(ifa.ifa_flags & (libc::IFF_UP as libc::c_uint) != 0);
            if ifa.ifa_addr.is_null() {
                continue;
            }
            // SAFETY: `ifa_addr` is non-null and its family tag selects the
            // concrete sockaddr layout read below.
            let family = i32::from(unsafe { (*ifa.ifa_addr).sa_family });
            match family {
                libc::AF_INET => {
                    // SAFETY: AF_INET addresses are `sockaddr_in`.
                    let sin = unsafe { &*(ifa.ifa_addr as *const libc::sockaddr_in) };
                    let ip = Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr));
                    entry.ipv4.push(ip.to_string());
                }
                libc::AF_INET6 => {
                    // SAFETY: AF_INET6 addresses are `sockaddr_in6`.
                    let sin6 = unsafe { &*(ifa.ifa_addr as *const libc::sockaddr_in6) };
                    entry.ipv6.push(Ipv6Addr::from(sin6.sin6_addr.s6_addr).to_string());
                }
                _ => {}
            }
        }
        // SAFETY: `ifap` came from a successful `getifaddrs`.
        unsafe { libc::freeifaddrs(ifap) };

        let mut list: Vec<NetInterface> = by_name.into_values().collect();
        #[cfg(target_os = "linux")]
        for iface in &mut list {
            enrich_from_sysfs(iface);
        }
        sort_interfaces(&mut list);
        list
    }
    #[cfg(not(unix))]
    {
        Vec::new()
    }
}

#[cfg(target_os = "linux")]
fn enrich_from_sysfs(iface: &mut NetInterface) {
    let dir = Path::new("/sys/class/net").join(&iface.name);
    iface.mac = read_trimmed(&dir.join("address")).filter(|m| m != "00:00:00:00:00:00");
    iface.mtu = read_first_f64(&dir.join("mtu")).map(|v| v as u32);
    // Virtual and down links report -1 or refuse the read.
    iface.speed_mbps = read_first_f64(&dir.join("speed"))
        .filter(|v| *v > 0.0)
        .map(|v| v as u32);
}

fn sort_interfaces(list: &mut [NetInterface]) {
    list.sort_by_key(|i| i.name.to_lowercase());
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

#[cfg(target_os = "linux")]
fn read_trimmed(path: &Path) -> Option<String> {
    let raw = std::fs::read_to_string(path).ok()?;
    let v = raw.trim();
    if v.is_empty() {
        None
    } else {
        Some(v.to_string())
    }
}

#[cfg(target_os = "linux")]
fn read_first_f64(path: &Path) -> Option<f64> {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|s| s.split_whitespace().next().and_then(|v| v.parse().ok()))
}

#[cfg(target_os = "macos")]
fn run_command(cmd: &str, args: &[&str]) -> Option<String> {
    const COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

    let mut child = std::process::Command::new(cmd)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .ok()?;

    let start = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                if !status.success() {
                    return None;
                }
                let mut out = Vec::new();
                if let Some(mut stdout) = child.stdout.take() {
                    let _ = stdout.read_to_end(&mut out);
                }
                let s = String::from_utf8_lossy(&out).trim().to_string();
                return if s.is_empty() { None } else { Some(s) };
            }
            Ok(None) => {
                if start.elapsed() >= COMMAND_TIMEOUT {
                    let _ = child.kill();
                    let _ = child.wait();
                    return None;
                }
                std::thread::sleep(Duration::from_millis(5));
            }
            Err(_) => return None,
        }
    }
}

#[cfg(target_os = "macos")]
fn read_sysctl(key: &str) -> Option<String> {
    run_command("sysctl", &["-n", key])
}
