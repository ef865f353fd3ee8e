use std::env;
use std::fs;

// 允许注入编译期环境的 .env 键
const ALLOWED_KEYS: &[&str] = &[
    "WIFI_SSID",
    "WIFI_PASS",
    "DIRECTORY_BASE_URL",
    "DIRECTORY_TOKEN",
    "NETWORK_PROBE_ADDR",
];

fn main() {
    // 主机台架构建不需要 ESP-IDF 环境
    if env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("espidf") {
        embuild::espidf::sysenv::output();
    }
    inject_dotenv(".env");
}

fn inject_dotenv(path: &str) {
    println!("cargo:rerun-if-changed={}", path);
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(_) => {
            println!("cargo:warning={} not found, using built-in defaults", path);
            return;
        }
    };
    contents
        .lines()
        .filter_map(parse_assignment)
        .filter(|(key, _)| ALLOWED_KEYS.contains(key))
        .for_each(|(key, value)| println!("cargo:rustc-env={}={}", key, value));
}

/// `[export ]KEY=VALUE`，值可带双引号；空行与 `#` 注释返回 None。
fn parse_assignment(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let line = line.strip_prefix("export ").unwrap_or(line);
    let (key, value) = line.split_once('=')?;
    let value = value.trim();
    let value = value
        .strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .unwrap_or(value);
    Some((key.trim(), value))
}
