//! Historical key names for each canonical field, most specific first.
//! Resolved once while parsing; downstream stages only read canonical fields.

pub struct FieldAliases {
    pub service: &'static [&'static str],
    pub level: &'static [&'static str],
    pub message: &'static [&'static str],
    pub timestamp: &'static [&'static str],
    pub cpu_percent: &'static [&'static str],
    pub memory_mb: &'static [&'static str],
    pub response_ms: &'static [&'static str],
    pub bytes_in: &'static [&'static str],
    pub bytes_out: &'static [&'static str],
    pub user_id: &'static [&'static str],
    pub client_ip: &'static [&'static str],
    pub host: &'static [&'static str],
    pub pod: &'static [&'static str],
    pub namespace: &'static [&'static str],
    pub transaction_id: &'static [&'static str],
    pub amount: &'static [&'static str],
    pub currency: &'static [&'static str],
    pub error_code: &'static [&'static str],
    pub component: &'static [&'static str],
    pub tags: &'static [&'static str],
    pub raw: &'static [&'static str],
}

pub const ALIASES: FieldAliases = FieldAliases {
    service: &["service_s_s", "service_s", "service"],
    level: &["Level", "level", "severity"],
    message: &["Message", "message", "msg"],
    timestamp: &["timestamp", "TimeGenerated", "Time", "time", "@timestamp", "ts"],
    cpu_percent: &["cpu_percent_d_d", "cpu_percent_d", "cpu_percent", "cpuPercent"],
    memory_mb: &["memory_mb_d_d", "memory_mb_d", "memory_mb", "memoryMb"],
    response_ms: &["response_ms_d_d", "response_ms_d", "response_ms", "responseMs"],
    bytes_in: &["bytes_in_d", "bytes_in", "bytesIn"],
    bytes_out: &["bytes_out_d", "bytes_out", "bytesOut"],
    user_id: &["user_id_s", "user_id", "userId"],
    client_ip: &["client_ip_s", "client_ip", "clientIp"],
    host: &["host_s", "host", "hostname"],
    pod: &["pod_s", "pod"],
    namespace: &["k8s_namespace_s", "k8s_namespace", "namespace"],
    transaction_id: &["transaction_id_s", "transaction_id", "transactionId"],
    amount: &["amount_d", "amount"],
    currency: &["currency_s", "currency"],
    error_code: &["error_code_s", "error_code", "errorCode"],
    component: &["component_s", "component"],
    tags: &["tags_s", "tags"],
    raw: &["raw_s", "raw"],
};
