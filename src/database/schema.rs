// Database schema definitions and migrations
// This module contains the SQL schema for the audit ledger database

pub const AUDIT_LOG_SCHEMA: &str = include_str!("../../migrations/001_audit_logs.sql");

/// Migrations in the order they must be applied
pub const MIGRATIONS: &[(&str, &str)] = &[("001_audit_logs", AUDIT_LOG_SCHEMA)];
