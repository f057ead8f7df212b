pub const SELECT_TENANTS: &str = r#"
SELECT tenant_id, name, provider_api_token, settings, active FROM tenants WHERE active = true ORDER BY tenant_id;
"#;

pub const SELECT_TENANT: &str = r#"
SELECT tenant_id, name, provider_api_token, settings, active FROM tenants WHERE tenant_id = $1;
"#;

pub const SELECT_CONTACTS: &str = r#"
SELECT contact_id, tenant_id, name, recipient_type, phone, whatsapp, priority, active
FROM contacts
WHERE tenant_id = $1 AND active = true
ORDER BY priority ASC, name ASC;
"#;

pub const INSERT_SIGNAL: &str = r#"
INSERT INTO signals (
    signal_id, tenant_id, provider_event_id, vehicle_id, vehicle_name, driver_id, driver_name,
    behavior_labels, severity, lat, lon, occurred_at, received_at, raw_payload
) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
ON CONFLICT (tenant_id, provider_event_id) DO NOTHING;
"#;

const SIGNAL_COLUMNS: &str = "signal_id, tenant_id, provider_event_id, vehicle_id, vehicle_name, driver_id, driver_name, behavior_labels, severity, lat, lon, occurred_at, received_at, raw_payload";

pub fn select_signals_since() -> String {
    format!(
        "SELECT {} FROM signals WHERE tenant_id = $1 AND occurred_at >= $2 ORDER BY occurred_at ASC, signal_id ASC",
        SIGNAL_COLUMNS
    )
}

pub fn select_signals_for_alert() -> String {
    format!(
        "SELECT {} FROM signals s WHERE s.signal_id IN (SELECT signal_id FROM alert_sources WHERE alert_id = $1) ORDER BY occurred_at ASC",
        SIGNAL_COLUMNS
    )
}

pub const INSERT_ALERT: &str = r#"
INSERT INTO alerts (
    alert_id, tenant_id, vehicle_id, vehicle_name, driver_id, driver_name, behavior, severity,
    occurred_at, ai_status, ai_error, verdict, likelihood, confidence, reasoning, ai_message,
    dedupe_key, risk_escalation, investigation_count, next_check_minutes, last_investigated_at,
    human_status, reviewed_by, reviewed_at, attention_state, ack_status, acked_by, acked_at,
    ack_due_at, resolve_due_at, resolved_at, escalation_level, escalation_count,
    next_escalation_at, last_escalated_at, owner_user_id, owner_contact_id,
    notification_channels, notification_sent_at, created_at, updated_at
) VALUES (
    $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20,
    $21, $22, $23, $24, $25, $26, $27, $28, $29, $30, $31, $32, $33, $34, $35, $36, $37, $38,
    $39, $40, $41
);
"#;

pub const INSERT_ALERT_SOURCE: &str = r#"
INSERT INTO alert_sources (alert_id, signal_id, role) VALUES ($1, $2, $3)
ON CONFLICT (alert_id, signal_id) DO UPDATE SET role = EXCLUDED.role;
"#;

pub const SELECT_ALERT: &str = "SELECT * FROM alerts WHERE alert_id = $1";

pub const SELECT_OPEN_ALERTS: &str = r#"
SELECT * FROM alerts WHERE tenant_id = $1 AND attention_state <> 'closed';
"#;

pub const SELECT_INVESTIGATING_ALERTS: &str = r#"
SELECT * FROM alerts
WHERE ai_status = 'investigating' AND ($1::uuid IS NULL OR tenant_id = $1);
"#;

pub const SELECT_ALERTS_NEEDING_RETRY: &str = r#"
SELECT * FROM alerts a
WHERE ($1::uuid IS NULL OR a.tenant_id = $1)
  AND a.updated_at < $2
  AND (
    a.ai_status IN ('pending', 'processing')
    OR (
      a.ai_status = 'completed'
      AND a.attention_state <> 'closed'
      AND NOT EXISTS (SELECT 1 FROM notification_decisions d WHERE d.alert_id = a.alert_id)
    )
  )
ORDER BY a.created_at ASC;
"#;

pub const SELECT_ALERTS_DUE_FOR_ESCALATION: &str = r#"
SELECT * FROM alerts
WHERE attention_state = 'needs_attention'
  AND ack_status = 'pending'
  AND next_escalation_at IS NOT NULL
  AND next_escalation_at <= $2
  AND ($1::uuid IS NULL OR tenant_id = $1)
ORDER BY next_escalation_at ASC;
"#;

pub const UPDATE_AI_STATE: &str = r#"
UPDATE alerts
SET ai_status = $2,
    ai_error = $3,
    verdict = $4,
    likelihood = $5,
    confidence = $6,
    reasoning = $7,
    ai_message = $8,
    dedupe_key = $9,
    risk_escalation = $10,
    investigation_count = $11,
    next_check_minutes = $12,
    last_investigated_at = $13,
    updated_at = $14
WHERE alert_id = $1;
"#;

pub const UPDATE_HUMAN_STATUS: &str = r#"
UPDATE alerts
SET human_status = $2,
    reviewed_by = $3,
    reviewed_at = $4,
    attention_state = $5,
    resolved_at = $6,
    next_escalation_at = CASE WHEN $5 = 'closed' THEN NULL ELSE next_escalation_at END,
    updated_at = $4
WHERE alert_id = $1;
"#;

pub const UPDATE_ACK: &str = r#"
UPDATE alerts
SET ack_status = $2,
    acked_by = $3,
    acked_at = $4,
    attention_state = $5,
    next_escalation_at = NULL,
    updated_at = $4
WHERE alert_id = $1;
"#;

pub const UPDATE_ESCALATION: &str = r#"
UPDATE alerts
SET escalation_level = GREATEST(escalation_level, $2),
    escalation_count = GREATEST(escalation_count, $3),
    risk_escalation = $4,
    next_escalation_at = $5,
    last_escalated_at = $6,
    updated_at = $7
WHERE alert_id = $1;
"#;

pub const UPDATE_NOTIFICATION: &str = r#"
UPDATE alerts
SET notification_channels = $2,
    notification_sent_at = $3,
    attention_state = $4,
    ack_due_at = $5,
    resolve_due_at = $6,
    next_escalation_at = $7,
    updated_at = $3
WHERE alert_id = $1;
"#;

pub const UPDATE_ATTENTION_STATE: &str = r#"
UPDATE alerts SET attention_state = $2, updated_at = $3 WHERE alert_id = $1;
"#;

pub const UPDATE_OWNER: &str = r#"
UPDATE alerts SET owner_user_id = $2, owner_contact_id = $3, updated_at = $4 WHERE alert_id = $1;
"#;

pub const INSERT_ACTIVITY: &str = r#"
INSERT INTO alert_activity (activity_id, alert_id, actor_user_id, action, metadata, created_at)
VALUES ($1, $2, $3, $4, $5, $6);
"#;

pub const SELECT_ACTIVITY: &str = r#"
SELECT activity_id, alert_id, actor_user_id, action, metadata, created_at
FROM alert_activity WHERE alert_id = $1 ORDER BY created_at ASC;
"#;

pub const PURGE_DEDUPE: &str = "DELETE FROM dedupe_log WHERE last_seen_at < $1";

pub const BUMP_DEDUPE: &str = r#"
UPDATE dedupe_log SET count = count + 1, last_seen_at = $2 WHERE dedupe_key = $1;
"#;

pub const INSERT_DEDUPE: &str = r#"
INSERT INTO dedupe_log (dedupe_key, first_seen_at, last_seen_at, count)
VALUES ($1, $2, $2, 1)
ON CONFLICT (dedupe_key) DO NOTHING;
"#;

pub const DELETE_DEDUPE: &str = "DELETE FROM dedupe_log WHERE dedupe_key = $1";

pub const PURGE_THROTTLE: &str = "DELETE FROM throttle_log WHERE created_at < $1";

pub const COUNT_THROTTLE: &str = r#"
SELECT COUNT(*) FROM throttle_log WHERE throttle_key = $1 AND created_at > $2;
"#;

pub const INSERT_THROTTLE: &str = r#"
INSERT INTO throttle_log (throttle_key, created_at) VALUES ($1, $2);
"#;

pub const INSERT_DECISION: &str = r#"
INSERT INTO notification_decisions (
    decision_id, tenant_id, alert_id, should_notify, escalation_level, risk_escalation,
    channels, message, voice_script, reason, created_at
) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11);
"#;

pub const INSERT_RECIPIENT: &str = r#"
INSERT INTO notification_recipients (decision_id, contact_id, recipient_type, name, phone, whatsapp, priority)
VALUES ($1, $2, $3, $4, $5, $6, $7);
"#;

pub const INSERT_RESULT: &str = r#"
INSERT INTO notification_results (
    result_id, decision_id, channel, recipient_name, destination, success, error,
    provider_id, delivery_status, created_at
) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10);
"#;

pub const SELECT_RESULT_BY_PROVIDER_ID: &str = r#"
SELECT result_id, decision_id, channel, recipient_name, destination, success, error,
       provider_id, delivery_status, created_at
FROM notification_results WHERE provider_id = $1
ORDER BY created_at DESC LIMIT 1;
"#;

pub const INSERT_DELIVERY_EVENT: &str = r#"
INSERT INTO notification_delivery_events (event_id, result_id, status, provider_code, provider_message, received_at)
VALUES ($1, $2, $3, $4, $5, $6);
"#;

pub const UPDATE_DELIVERY_STATUS: &str = r#"
UPDATE notification_results
SET delivery_status = $2
WHERE result_id = $1
  AND (delivery_status IS NULL OR delivery_status NOT IN ('delivered', 'read', 'failed', 'undelivered'));
"#;

pub const UPSERT_VEHICLE_STAT: &str = r#"
INSERT INTO vehicle_stats (tenant_id, vehicle_id, vehicle_name, last_stat_at, lat, lon)
VALUES ($1, $2, $3, $4, $5, $6)
ON CONFLICT (tenant_id, vehicle_id) DO UPDATE
SET vehicle_name = COALESCE(EXCLUDED.vehicle_name, vehicle_stats.vehicle_name),
    last_stat_at = GREATEST(vehicle_stats.last_stat_at, EXCLUDED.last_stat_at),
    lat = CASE WHEN EXCLUDED.last_stat_at >= vehicle_stats.last_stat_at OR vehicle_stats.last_stat_at IS NULL
               THEN EXCLUDED.lat ELSE vehicle_stats.lat END,
    lon = CASE WHEN EXCLUDED.last_stat_at >= vehicle_stats.last_stat_at OR vehicle_stats.last_stat_at IS NULL
               THEN EXCLUDED.lon ELSE vehicle_stats.lon END;
"#;

pub const SELECT_VEHICLE_STATS: &str = r#"
SELECT tenant_id, vehicle_id, vehicle_name, last_stat_at, lat, lon
FROM vehicle_stats WHERE tenant_id = $1 ORDER BY vehicle_id;
"#;

const STALE_COLUMNS: &str = "stale_alert_id, tenant_id, vehicle_id, vehicle_name, last_stat_at, alerted_at, resolved_at, channels, recipients";

pub fn select_open_stale_alert() -> String {
    format!(
        "SELECT {} FROM stale_asset_alerts WHERE tenant_id = $1 AND vehicle_id = $2 AND resolved_at IS NULL",
        STALE_COLUMNS
    )
}

pub fn select_open_stale_alerts() -> String {
    format!(
        "SELECT {} FROM stale_asset_alerts WHERE tenant_id = $1 AND resolved_at IS NULL ORDER BY vehicle_id",
        STALE_COLUMNS
    )
}

pub const INSERT_STALE_ALERT: &str = r#"
INSERT INTO stale_asset_alerts (
    stale_alert_id, tenant_id, vehicle_id, vehicle_name, last_stat_at, alerted_at, resolved_at, channels, recipients
) VALUES ($1, $2, $3, $4, $5, $6, NULL, $7, $8)
ON CONFLICT (tenant_id, vehicle_id) WHERE resolved_at IS NULL DO NOTHING;
"#;

pub const REFRESH_STALE_ALERT: &str = r#"
UPDATE stale_asset_alerts
SET last_stat_at = $2, alerted_at = $3, channels = $4, recipients = $5
WHERE stale_alert_id = $1 AND resolved_at IS NULL;
"#;

pub const DISCARD_STALE_ALERT: &str =
    "DELETE FROM stale_asset_alerts WHERE stale_alert_id = $1 AND resolved_at IS NULL";

pub const RESOLVE_STALE_ALERT: &str = r#"
UPDATE stale_asset_alerts SET resolved_at = $2 WHERE stale_alert_id = $1 AND resolved_at IS NULL;
"#;

pub const INSERT_INCIDENT: &str = r#"
INSERT INTO incidents (
    incident_id, tenant_id, incident_type, priority, status, subject_type, subject_id,
    subject_name, behavior, dedupe_key, title, summary, created_at
) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
ON CONFLICT (tenant_id, dedupe_key) DO NOTHING;
"#;

pub const INSERT_INCIDENT_SIGNAL: &str = r#"
INSERT INTO incident_signals (incident_id, signal_id, role, relevance)
VALUES ($1, $2, $3, $4)
ON CONFLICT (incident_id, signal_id) DO NOTHING;
"#;

pub const SELECT_INCIDENTS: &str = r#"
SELECT incident_id, tenant_id, incident_type, priority, status, subject_type, subject_id,
       subject_name, behavior, dedupe_key, title, summary, created_at
FROM incidents WHERE tenant_id = $1 ORDER BY created_at DESC;
"#;

pub const SELECT_INCIDENT_SIGNALS: &str = r#"
SELECT incident_id, signal_id, role, relevance FROM incident_signals WHERE incident_id = $1;
"#;

pub const SELECT_CURSOR: &str = r#"
SELECT tenant_id, cursor, start_time FROM stream_cursors WHERE tenant_id = $1;
"#;

pub const UPSERT_CURSOR: &str = r#"
INSERT INTO stream_cursors (tenant_id, cursor, start_time, updated_at)
VALUES ($1, $2, $3, $4)
ON CONFLICT (tenant_id) DO UPDATE
SET cursor = EXCLUDED.cursor,
    start_time = EXCLUDED.start_time,
    updated_at = EXCLUDED.updated_at;
"#;

pub const DELETE_CURSOR: &str = "DELETE FROM stream_cursors WHERE tenant_id = $1";
