pub const DEFAULT_CONFIG_FILE_NAME: &str = "netpilot.toml";
pub const ENV_PREFIX: &str = "NP";
pub const LOG_DIR: &str = "logs";
pub const LOG_FILE_NAME: &str = "netpilot.log";

pub const OTP_CACHE_NAME: &str = "OtpCode";
pub const OTP_CACHE_PREFIX: &str = "otp";
