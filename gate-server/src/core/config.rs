use crate::parking::Tariff;
use crate::parking::money::parse_amount;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// 网关节点配置
///
/// # 环境变量
///
/// | 环境变量 | 默认值 | 说明 |
/// |----------|--------|------|
/// | WORK_DIR | ./data | 工作目录（数据库、日志） |
/// | LOG_LEVEL | info | 日志级别 |
/// | LOG_DIR | - | 日志目录，未设置时只输出到控制台 |
/// | LOG_JSON | false | 控制台输出 JSON |
/// | MESSAGE_TCP_ADDR | 0.0.0.0:1883 | TCP 消息桥接地址 |
/// | BUS_CHANNEL_CAPACITY | 1024 | 消息总线缓冲 |
/// | REQUEST_TIMEOUT_MS | 5000 | 存储/闸机调用超时 |
/// | SHUTDOWN_TIMEOUT_MS | 10000 | 关闭超时 |
/// | GATE_CAMERA_ID | GATE_CAM | 闸机读卡器摄像头 ID |
/// | DEDUP_WINDOW | 1024 | 刷卡去重窗口大小 |
/// | AVAILABILITY_REFRESH_MS | 30000 | 可用性定时发布间隔，0 关闭 |
/// | TARIFF_PER_HOUR | 10.00 | 每小时费率 |
/// | BILLING_UNIT_MINUTES | 15 | 计费单位 |
/// | MIN_CHARGE | 10.00 | 最低收费 |
/// | GRACE_PERIOD_MINUTES | 5 | 免费时长 |
/// | MAX_DAILY_CHARGE | - | 封顶金额 |
///
/// # 示例
///
/// ```ignore
/// WORK_DIR=/var/lib/parking TARIFF_PER_HOUR=20 cargo run
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// 工作目录
    pub work_dir: String,
    pub log_level: String,
    pub log_dir: Option<String>,
    pub log_json: bool,
    /// TCP 消息桥接地址
    pub message_tcp_addr: String,
    pub bus_channel_capacity: usize,
    /// 存储/闸机调用超时 (毫秒)
    pub request_timeout_ms: u64,
    /// 关闭超时 (毫秒)
    pub shutdown_timeout_ms: u64,
    /// 入口读卡器对应的摄像头 ID
    pub gate_camera_id: String,
    pub dedup_window: usize,
    /// 0 = 不定时发布
    pub availability_refresh_ms: u64,
    pub tariff: Tariff,
    /// 加载时发现的问题，日志初始化后由 [`Config::log_warnings`] 输出
    warnings: Vec<String>,
}

impl Config {
    /// 从环境变量加载配置
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 从任意键值来源加载配置（测试用）
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let flag = |key: &str| {
            lookup(key)
                .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false)
        };

        let mut warnings = Vec::new();
        let amount = |key: &str, warnings: &mut Vec<String>| {
            let raw = lookup(key)?;
            let parsed = parse_amount(&raw);
            if parsed.is_none() {
                warnings.push(format!("{}={:?} is not an amount, using default", key, raw));
            }
            parsed
        };

        let defaults = Tariff::default();
        let tariff = Tariff {
            tariff_per_hour: amount("TARIFF_PER_HOUR", &mut warnings)
                .unwrap_or(defaults.tariff_per_hour),
            billing_unit_minutes: parse_var(&lookup, "BILLING_UNIT_MINUTES", &mut warnings)
                .unwrap_or(defaults.billing_unit_minutes),
            min_charge: amount("MIN_CHARGE", &mut warnings).unwrap_or(defaults.min_charge),
            grace_period_minutes: parse_var(&lookup, "GRACE_PERIOD_MINUTES", &mut warnings)
                .unwrap_or(defaults.grace_period_minutes),
            max_daily_charge: amount("MAX_DAILY_CHARGE", &mut warnings),
        };
        let tariff = match tariff.validate() {
            Ok(()) => tariff,
            Err(e) => {
                warnings.push(format!("{}, using default tariff", e));
                defaults
            }
        };

        let bus_channel_capacity: usize = match parse_var(&lookup, "BUS_CHANNEL_CAPACITY", &mut warnings) {
            Some(0) => {
                warnings.push("BUS_CHANNEL_CAPACITY must be positive, using 1024".to_string());
                1024
            }
            Some(c) => c,
            None => 1024,
        };

        Self {
            work_dir: lookup("WORK_DIR").unwrap_or_else(|| "./data".into()),
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".into()),
            log_dir: lookup("LOG_DIR").filter(|v| !v.is_empty()),
            log_json: flag("LOG_JSON"),
            message_tcp_addr: lookup("MESSAGE_TCP_ADDR").unwrap_or_else(|| "0.0.0.0:1883".into()),
            bus_channel_capacity,
            request_timeout_ms: parse_var(&lookup, "REQUEST_TIMEOUT_MS", &mut warnings)
                .unwrap_or(5000),
            shutdown_timeout_ms: parse_var(&lookup, "SHUTDOWN_TIMEOUT_MS", &mut warnings)
                .unwrap_or(10000),
            gate_camera_id: lookup("GATE_CAMERA_ID").unwrap_or_else(|| "GATE_CAM".into()),
            dedup_window: parse_var(&lookup, "DEDUP_WINDOW", &mut warnings).unwrap_or(1024),
            availability_refresh_ms: parse_var(&lookup, "AVAILABILITY_REFRESH_MS", &mut warnings)
                .unwrap_or(30000),
            tariff,
            warnings,
        }
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// 输出加载警告（需在日志初始化之后调用）
    pub fn log_warnings(&self) {
        for warning in &self.warnings {
            tracing::warn!("Configuration: {}", warning);
        }
    }

    /// 使用指定工作目录（测试场景）
    pub fn with_work_dir(work_dir: impl Into<String>) -> Self {
        let mut config = Self::from_lookup(|_| None);
        config.work_dir = work_dir.into();
        config.message_tcp_addr = "127.0.0.1:0".into();
        config
    }

    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(&self.work_dir).join("parking.redb")
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn availability_refresh(&self) -> Option<Duration> {
        (self.availability_refresh_ms > 0).then(|| Duration::from_millis(self.availability_refresh_ms))
    }
}

fn parse_var<T: FromStr>(
    lookup: &dyn Fn(&str) -> Option<String>,
    key: &str,
    warnings: &mut Vec<String>,
) -> Option<T> {
    let raw = lookup(key)?;
    let parsed = raw.trim().parse().ok();
    if parsed.is_none() {
        warnings.push(format!("{}={:?} is not a valid number, using default", key, raw));
    }
    parsed
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
