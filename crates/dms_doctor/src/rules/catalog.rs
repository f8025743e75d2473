//! Built-in DMS rule library
//!
//! Most causes have more than one rule (status, log, metric) so that
//! independent signals corroborate each other in the correlator.

use super::{CauseInfo, Condition, EvidenceSlot, Rule};
use crate::collector::{keys, SignalKind};
use crate::evidence::META_MISSING_SIGNAL;

const MIB: f64 = 1024.0 * 1024.0;
const GIB: f64 = 1024.0 * MIB;

/// Free memory under this is pressure
const LOW_FREEABLE_MEMORY: f64 = 256.0 * MIB;
const HIGH_SWAP_USAGE: f64 = 512.0 * MIB;
const LOW_FREE_STORAGE: f64 = GIB;
const HIGH_CPU_PERCENT: f64 = 90.0;
/// CDC latency in seconds
const HIGH_CDC_LATENCY: f64 = 600.0;
const LOW_CDC_LATENCY: f64 = 60.0;
const HIGH_INCOMING_CHANGES: f64 = 10_000.0;
/// Consecutive samples that make a metric condition sustained
const SUSTAINED_SAMPLES: usize = 3;

const FAILED_STATES: &[&str] = &["failed", "error", "stopped"];

pub fn builtin_causes() -> Vec<CauseInfo> {
    vec![
        CauseInfo::new(
            "source_endpoint_unreachable",
            "Source endpoint unreachable",
            "The replication instance cannot open a network connection to the source database.",
            "connectivity",
        ),
        CauseInfo::new(
            "target_endpoint_unreachable",
            "Target endpoint unreachable",
            "The replication instance cannot open a network connection to the target database.",
            "connectivity",
        ),
        CauseInfo::new(
            "endpoint_authentication_failure",
            "Endpoint authentication failure",
            "An endpoint rejected the configured credentials.",
            "connectivity",
        ),
        CauseInfo::new(
            "insufficient_privileges",
            "Insufficient database privileges",
            "The migration user lacks privileges required for full load or change capture.",
            "permissions",
        ),
        CauseInfo::new(
            "replication_instance_memory_pressure",
            "Replication instance memory pressure",
            "The replication instance is low on memory and swapping, which slows or kills the task.",
            "capacity",
        ),
        CauseInfo::new(
            "replication_instance_cpu_saturation",
            "Replication instance CPU saturation",
            "The replication instance CPU is saturated for a sustained period.",
            "capacity",
        ),
        CauseInfo::new(
            "replication_instance_storage_full",
            "Replication instance storage exhausted",
            "The replication instance is running out of local storage for swap files and logs.",
            "capacity",
        ),
        CauseInfo::new(
            "source_capture_lag",
            "Source capture lag",
            "Change data capture is falling behind reading changes from the source.",
            "performance",
        ),
        CauseInfo::new(
            "target_apply_bottleneck",
            "Target apply bottleneck",
            "Changes are captured on time but applied slowly on the target.",
            "performance",
        ),
        CauseInfo::new(
            "table_mapping_error",
            "Table mapping or table load error",
            "One or more tables failed to load, typically from mapping rules or target DDL.",
            "configuration",
        ),
        CauseInfo::new(
            "source_log_retention",
            "Source transaction log retention too short",
            "Change capture needs transaction logs that the source has already purged.",
            "configuration",
        ),
        CauseInfo::new(
            "data_conversion_errors",
            "Data conversion errors",
            "Rows failed to load because values could not be converted to target types.",
            "data",
        ),
        CauseInfo::new(
            "lob_truncation",
            "LOB truncation",
            "LOB columns exceed the limited LOB size and are being truncated.",
            "data",
        ),
        CauseInfo::new(
            "replication_instance_unreachable",
            "Replication instance unreachable",
            "The task errored and the replication instance reported no metrics at all.",
            "infrastructure",
        ),
    ]
}

pub fn builtin_rules() -> Vec<Rule> {
    let mut rules = Vec::new();
    rules.extend(connectivity_rules());
    rules.extend(permission_rules());
    rules.extend(capacity_rules());
    rules.extend(performance_rules());
    rules.extend(table_rules());
    rules.extend(data_rules());
    rules
}

fn connectivity_rules() -> Vec<Rule> {
    vec![
        Rule::new(
            "status.source_connection_failed",
            "Source connection test failed",
            "source_endpoint_unreachable",
            0.8,
        )
        .slot(EvidenceSlot::status(keys::SOURCE_CONNECTION, Condition::equals("failed")))
        .slot(
            EvidenceSlot::status(
                keys::SOURCE_CONNECTION_FAILURE,
                Condition::matches(r"(?i)(timed? ?out|refused|unreachable|no route|could not connect|network)"),
            )
            .optional(),
        )
        .with_remediation(
            "Check the source security group, network ACLs and route tables allow traffic from the replication instance, then re-run the endpoint connection test.",
        ),
        Rule::new(
            "log.source_connect_error",
            "Source capture cannot connect",
            "source_endpoint_unreachable",
            0.6,
        )
        .slot(EvidenceSlot::log(
            keys::LOG_ERROR,
            Condition::matches(r"(?i)^\[SOURCE_(CAPTURE|UNLOAD)\].*(cannot connect|could not connect|connection refused|timed out|network error)"),
        ))
        .slot(EvidenceSlot::status(keys::TASK_STATE, Condition::one_of(FAILED_STATES)).optional())
        .with_remediation("Verify the source host, port and DNS name resolve and accept connections from the replication subnet."),
        Rule::new(
            "status.target_connection_failed",
            "Target connection test failed",
            "target_endpoint_unreachable",
            0.8,
        )
        .slot(EvidenceSlot::status(keys::TARGET_CONNECTION, Condition::equals("failed")))
        .slot(
            EvidenceSlot::status(
                keys::TARGET_CONNECTION_FAILURE,
                Condition::matches(r"(?i)(timed? ?out|refused|unreachable|no route|could not connect|network)"),
            )
            .optional(),
        )
        .with_remediation(
            "Check the target security group and network path from the replication instance, then re-run the endpoint connection test.",
        ),
        Rule::new(
            "log.target_connect_error",
            "Target apply cannot connect",
            "target_endpoint_unreachable",
            0.6,
        )
        .slot(EvidenceSlot::log(
            keys::LOG_ERROR,
            Condition::matches(r"(?i)^\[(TARGET_APPLY|TARGET_LOAD)\].*(cannot connect|could not connect|connection refused|timed out|network error)"),
        ))
        .slot(EvidenceSlot::status(keys::TASK_STATE, Condition::one_of(FAILED_STATES)).optional())
        .with_remediation("Verify the target endpoint is running and reachable from the replication subnet."),
        Rule::new(
            "status.connection_auth_failed",
            "Connection test rejected credentials",
            "endpoint_authentication_failure",
            0.85,
        )
        .slot(EvidenceSlot::status(
            keys::SOURCE_CONNECTION_FAILURE,
            Condition::matches(r"(?i)(password authentication failed|login failed|access denied for user|invalid username/password|ORA-01017)"),
        ))
        .with_remediation("Update the endpoint username and password (or the Secrets Manager secret) and re-test the connection."),
        Rule::new(
            "status.target_auth_failed",
            "Target connection test rejected credentials",
            "endpoint_authentication_failure",
            0.85,
        )
        .slot(EvidenceSlot::status(
            keys::TARGET_CONNECTION_FAILURE,
            Condition::matches(r"(?i)(password authentication failed|login failed|access denied for user|invalid username/password|ORA-01017)"),
        ))
        .with_remediation("Update the target endpoint credentials and re-test the connection."),
        Rule::new(
            "log.auth_error",
            "Authentication errors in task log",
            "endpoint_authentication_failure",
            0.6,
        )
        .slot(EvidenceSlot::log(
            keys::LOG_ERROR,
            Condition::matches(r"(?i)(password authentication failed|login failed|access denied for user|invalid username/password)"),
        ))
        .slot(EvidenceSlot::log(keys::LOG_ERROR_CODE, Condition::equals("ORA-01017")).optional())
        .with_remediation("Confirm the migration user's password has not expired or been rotated without updating the endpoint."),
    ]
}

fn permission_rules() -> Vec<Rule> {
    vec![
        Rule::new(
            "log.privilege_error",
            "Privilege errors in task log",
            "insufficient_privileges",
            0.7,
        )
        .slot(EvidenceSlot::log(
            keys::LOG_ERROR,
            Condition::matches(r"(?i)(insufficient privileges|permission denied|not authorized|must be superuser|REPLICATION CLIENT|REPLICATION SLAVE)"),
        ))
        .slot(EvidenceSlot::status(keys::TASK_STATE, Condition::one_of(FAILED_STATES)).optional())
        .with_remediation(
            "Grant the migration user the privileges DMS documents for this engine (for example SELECT on the source tables and the log-mining or replication grants for CDC).",
        ),
        Rule::new(
            "log.oracle_privilege_code",
            "Oracle insufficient privileges code",
            "insufficient_privileges",
            0.75,
        )
        .slot(EvidenceSlot::log(keys::LOG_ERROR_CODE, Condition::one_of(&["ORA-01031", "ORA-00942"])))
        .with_remediation("Grant the Oracle user the LogMiner or Binary Reader privileges and SELECT on the dictionary views DMS reads."),
        Rule::new(
            "status.failure_message_privileges",
            "Task failure message mentions privileges",
            "insufficient_privileges",
            0.6,
        )
        .slot(EvidenceSlot::status(
            keys::LAST_FAILURE_MESSAGE,
            Condition::matches(r"(?i)(privilege|permission|not authorized)"),
        ))
        .with_remediation("Review the grants of the migration user on both endpoints."),
    ]
}

fn capacity_rules() -> Vec<Rule> {
    vec![
        Rule::new(
            "metric.low_freeable_memory",
            "Freeable memory low",
            "replication_instance_memory_pressure",
            0.65,
        )
        .slot(EvidenceSlot::metric("FreeableMemory", Condition::below(LOW_FREEABLE_MEMORY)).at_least(SUSTAINED_SAMPLES))
        .slot(EvidenceSlot::metric("SwapUsage", Condition::above(HIGH_SWAP_USAGE)).optional())
        .with_remediation(
            "Scale the replication instance to a larger class or reduce MaxFullLoadSubTasks and transaction consistency timeouts.",
        ),
        Rule::new(
            "log.out_of_memory",
            "Out-of-memory errors in task log",
            "replication_instance_memory_pressure",
            0.7,
        )
        .slot(EvidenceSlot::log(
            keys::LOG_ERROR,
            Condition::matches(r"(?i)(out of memory|cannot allocate memory|memory allocation failed|std::bad_alloc)"),
        ))
        .with_remediation("Move the task to a replication instance with more memory or split large tables into separate tasks."),
        Rule::new(
            "metric.cpu_saturated",
            "CPU utilization sustained above 90%",
            "replication_instance_cpu_saturation",
            0.6,
        )
        .slot(EvidenceSlot::metric("CPUUtilization", Condition::above(HIGH_CPU_PERCENT)).at_least(SUSTAINED_SAMPLES))
        .slot(EvidenceSlot::metric("CDCLatencySource", Condition::above(HIGH_CDC_LATENCY)).optional().with_weight(0.5))
        .with_remediation("Scale the replication instance to a larger compute class or spread tables across more tasks."),
        Rule::new(
            "metric.low_free_storage",
            "Free storage space low",
            "replication_instance_storage_full",
            0.75,
        )
        .slot(EvidenceSlot::metric("FreeStorageSpace", Condition::below(LOW_FREE_STORAGE)))
        .with_remediation("Increase the allocated storage of the replication instance and review task log retention."),
        Rule::new(
            "log.storage_full",
            "Disk full errors in task log",
            "replication_instance_storage_full",
            0.7,
        )
        .slot(EvidenceSlot::log(
            keys::LOG_ERROR,
            Condition::matches(r"(?i)(no space left on device|disk full|storage[- ]full)"),
        ))
        .with_remediation("Increase the replication instance storage; large transactions spill to disk during CDC."),
        Rule::new(
            "status.instance_no_metrics",
            "Task errored and the instance reported no metrics",
            "replication_instance_unreachable",
            0.6,
        )
        .slot(EvidenceSlot::status(keys::TASK_STATE, Condition::one_of(&["failed", "error"])))
        // The whole metric signal, not one metric: any sample means the instance is reporting
        .slot(EvidenceSlot::meta(META_MISSING_SIGNAL, Condition::equals(SignalKind::Metric.as_str())).with_weight(2.0))
        .slot(
            EvidenceSlot::log(
                keys::LOG_ERROR,
                Condition::matches(r"(?i)replication instance.*(unreachable|not available|unavailable|failed)"),
            )
            .optional(),
        )
        .with_remediation(
            "Check the replication instance status in the console; reboot it or fail over if it is Multi-AZ, then resume the task.",
        ),
    ]
}

fn performance_rules() -> Vec<Rule> {
    vec![
        Rule::new(
            "metric.source_latency_high",
            "CDC source latency high",
            "source_capture_lag",
            0.6,
        )
        .slot(EvidenceSlot::metric("CDCLatencySource", Condition::above(HIGH_CDC_LATENCY)).at_least(SUSTAINED_SAMPLES))
        .slot(EvidenceSlot::metric("CDCIncomingChanges", Condition::above(HIGH_INCOMING_CHANGES)).optional().with_weight(0.5))
        .with_remediation(
            "Check source load and log reader settings; for Oracle consider Binary Reader, for PostgreSQL check replication slot lag.",
        ),
        Rule::new(
            "log.source_reader_warning",
            "Source reader falling behind",
            "source_capture_lag",
            0.4,
        )
        .slot(
            EvidenceSlot::log(
                keys::LOG_WARNING,
                Condition::matches(r"(?i)^\[SOURCE_CAPTURE\].*(latency|behind|reading.*slow|waiting for)"),
            )
            .at_least(2),
        )
        .with_remediation("Investigate source database load during the capture window."),
        Rule::new(
            "metric.target_latency_high",
            "CDC target latency high while source latency is low",
            "target_apply_bottleneck",
            0.65,
        )
        .slot(EvidenceSlot::metric("CDCLatencyTarget", Condition::above(HIGH_CDC_LATENCY)).at_least(SUSTAINED_SAMPLES))
        .slot(EvidenceSlot::metric("CDCLatencySource", Condition::below(LOW_CDC_LATENCY)).optional())
        .with_remediation(
            "Enable batch apply, check target indexes, triggers and foreign keys, and size the target for the change rate.",
        ),
        Rule::new(
            "log.target_apply_slow",
            "Target apply warnings in task log",
            "target_apply_bottleneck",
            0.4,
        )
        .slot(
            EvidenceSlot::log(
                keys::LOG_WARNING,
                Condition::matches(r"(?i)^\[TARGET_APPLY\].*(slow|timeout|lock|deadlock|waiting)"),
            )
            .at_least(2),
        )
        .with_remediation("Check the target for lock contention and long-running transactions."),
    ]
}

fn table_rules() -> Vec<Rule> {
    vec![
        Rule::new(
            "status.tables_errored",
            "Tables in error state",
            "table_mapping_error",
            0.6,
        )
        .slot(EvidenceSlot::status(keys::TABLES_ERRORED, Condition::above(0.0)))
        .slot(EvidenceSlot::status(keys::TABLE_STATE, Condition::equals("error")).optional())
        .with_remediation("Inspect table statistics for the failing tables and reload them after fixing the target DDL or mapping rule."),
        Rule::new(
            "log.table_mapping",
            "Table mapping problems in task log",
            "table_mapping_error",
            0.7,
        )
        .slot(EvidenceSlot::log(
            keys::LOG_ERROR,
            Condition::matches(r"(?i)(table mapping|no tables were found|selection rule|transformation rule|table .* does not exist)"),
        ))
        .with_remediation("Validate the table-mapping JSON: schema and table names are case-sensitive and must match the source."),
        Rule::new(
            "status.failure_message_mapping",
            "Task failure message mentions table mapping",
            "table_mapping_error",
            0.6,
        )
        .slot(EvidenceSlot::status(
            keys::LAST_FAILURE_MESSAGE,
            Condition::matches(r"(?i)(table mapping|no tables|mapping rule)"),
        ))
        .with_remediation("Fix the table mapping rules and restart the task."),
        Rule::new(
            "log.log_retention",
            "Source transaction log no longer available",
            "source_log_retention",
            0.8,
        )
        .slot(EvidenceSlot::log(
            keys::LOG_ERROR,
            Condition::matches(r"(?i)(could not find first log file|binary log.*(purged|not found)|archived log.*(not found|missing)|requested WAL segment .* has already been removed|log sequence.*not available)"),
        ))
        .with_remediation(
            "Increase source log retention (binlog retention hours, archive log retention, wal_keep_size) and restart the task from a valid position.",
        ),
        Rule::new(
            "log.oracle_log_code",
            "Oracle missing log file code",
            "source_log_retention",
            0.7,
        )
        .slot(EvidenceSlot::log(keys::LOG_ERROR_CODE, Condition::one_of(&["ORA-01291", "ORA-00308"])))
        .with_remediation("Restore the missing archived logs or restart CDC from a later SCN."),
    ]
}

fn data_rules() -> Vec<Rule> {
    vec![
        Rule::new(
            "status.full_load_error_rows",
            "Rows failed during full load",
            "data_conversion_errors",
            0.55,
        )
        .slot(EvidenceSlot::status(keys::FULL_LOAD_ERROR_ROWS, Condition::above(0.0)))
        .slot(
            EvidenceSlot::log(
                keys::LOG_ERROR,
                Condition::matches(r"(?i)(conversion|invalid value|out of range|invalid input syntax|data truncat)"),
            )
            .optional(),
        )
        .with_remediation(
            "Check the failing rows in the awsdms_apply_exceptions table and align source and target column types.",
        ),
        Rule::new(
            "log.conversion_error",
            "Conversion errors in task log",
            "data_conversion_errors",
            0.6,
        )
        .slot(EvidenceSlot::log(
            keys::LOG_ERROR,
            Condition::matches(r"(?i)(failed to convert|conversion error|invalid value for|numeric value out of range|invalid input syntax)"),
        ))
        .with_remediation("Add a transformation rule or widen the target column to accept the source values."),
        Rule::new(
            "log.lob_truncated",
            "LOB truncation warnings",
            "lob_truncation",
            0.75,
        )
        .slot(EvidenceSlot::log(
            keys::LOG_WARNING,
            Condition::matches(r"(?i)lob.*(truncat|exceed)"),
        ))
        .slot(EvidenceSlot::config("TargetMetadata.LimitedSizeLobMode", Condition::equals("true")).optional())
        .with_remediation("Raise LobMaxSize above the largest LOB in the source, or switch to full LOB mode for the affected tables."),
    ]
}
