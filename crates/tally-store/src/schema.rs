//! Managed tables and their per-dialect DDL
//!
//! Column names are the data model's camelCase names. PostgreSQL stores them
//! folded to lower case; [`column_case`] restores the canonical spelling on
//! the way out.

use tally_core::Backend;

use crate::dialect::ColumnCase;

/// Every table that takes part in bootstrap, export and import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManagedTable {
    Users,
    Contributions,
    ComplexProjects,
    AppMeta,
    PublicReports,
}

impl ManagedTable {
    /// Foreign-key dependency order: parents before children.
    pub const ALL: [ManagedTable; 5] = [
        ManagedTable::Users,
        ManagedTable::Contributions,
        ManagedTable::ComplexProjects,
        ManagedTable::AppMeta,
        ManagedTable::PublicReports,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ManagedTable::Users => "users",
            ManagedTable::Contributions => "contributions",
            ManagedTable::ComplexProjects => "complex_projects",
            ManagedTable::AppMeta => "app_meta",
            ManagedTable::PublicReports => "public_reports",
        }
    }

    /// Field name of this table's rows in the backup envelope.
    pub fn envelope_key(self) -> &'static str {
        match self {
            ManagedTable::Users => "users",
            ManagedTable::Contributions => "contributions",
            ManagedTable::ComplexProjects => "complexProjects",
            ManagedTable::AppMeta => "appMeta",
            ManagedTable::PublicReports => "publicReports",
        }
    }

    /// Tables that may be missing on older installations.
    pub fn is_best_effort(self) -> bool {
        matches!(self, ManagedTable::AppMeta | ManagedTable::PublicReports)
    }

    /// Tables keyed by a backend-generated integer `id`.
    pub fn has_identity(self) -> bool {
        matches!(
            self,
            ManagedTable::Users | ManagedTable::Contributions | ManagedTable::ComplexProjects
        )
    }

    /// Canonical column names, in DDL order.
    pub fn columns(self) -> &'static [&'static str] {
        match self {
            ManagedTable::Users => &[
                "id",
                "staffId",
                "email",
                "passwordHash",
                "name",
                "role",
                "status",
                "accountScopes",
                "saleContactNames",
                "saleContactEmails",
                "canViewOthers",
                "externalLinks",
                "createdAt",
                "updatedAt",
            ],
            ManagedTable::Contributions => &[
                "id",
                "userId",
                "title",
                "contributionType",
                "impactTier",
                "effortTier",
                "description",
                "accountName",
                "saleContactName",
                "impactEstimate",
                "periodTag",
                "year",
                "status",
                "tags",
                "attachments",
                "saleApproval",
                "createdAt",
                "updatedAt",
            ],
            ManagedTable::ComplexProjects => &[
                "id",
                "userId",
                "title",
                "description",
                "status",
                "successFactors",
                "lossReasons",
                "year",
                "createdAt",
                "updatedAt",
            ],
            ManagedTable::AppMeta => &["key", "value"],
            ManagedTable::PublicReports => &["key", "html", "generatedAt", "generatedBy", "params"],
        }
    }

    /// Deterministic export ordering: newest first, ties broken on the key.
    pub fn export_order(self) -> &'static str {
        match self {
            ManagedTable::AppMeta => "key ASC",
            ManagedTable::PublicReports => "generatedAt DESC, key ASC",
            _ => "createdAt DESC, id DESC",
        }
    }

    pub fn create_sql(self, backend: Backend) -> &'static str {
        match backend {
            Backend::Sqlite => sqlite_ddl(self),
            Backend::Postgres => postgres_ddl(self),
        }
    }
}

/// Case map covering every managed column.
pub fn column_case() -> ColumnCase {
    ColumnCase::new(
        ManagedTable::ALL
            .iter()
            .flat_map(|table| table.columns().iter().copied()),
    )
}

/// Statement listing a table's live columns as `name`, table name bound as `?`.
pub fn columns_query(backend: Backend) -> &'static str {
    match backend {
        Backend::Sqlite => "SELECT name FROM pragma_table_info(?)",
        Backend::Postgres => {
            "SELECT column_name::text AS name FROM information_schema.columns \
             WHERE table_schema = current_schema() AND table_name::text = ?"
        }
    }
}

/// A column added after the table's first release.
#[derive(Debug, Clone, Copy)]
pub struct AdditiveColumn {
    pub table: ManagedTable,
    pub column: &'static str,
    sqlite: &'static str,
    postgres: &'static str,
}

impl AdditiveColumn {
    pub fn alter_sql(&self, backend: Backend) -> String {
        let definition = match backend {
            Backend::Sqlite => self.sqlite,
            Backend::Postgres => self.postgres,
        };
        format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            self.table.name(),
            self.column,
            definition
        )
    }
}

/// Additive migrations, oldest first. Fresh databases already have these
/// columns, so each one fails there as a benign conflict.
pub const ADDITIVE_COLUMNS: &[AdditiveColumn] = &[
    AdditiveColumn {
        table: ManagedTable::Users,
        column: "canViewOthers",
        sqlite: "INTEGER NOT NULL DEFAULT 0",
        postgres: "BOOLEAN NOT NULL DEFAULT FALSE",
    },
    AdditiveColumn {
        table: ManagedTable::Users,
        column: "externalLinks",
        sqlite: "TEXT DEFAULT '[]'",
        postgres: "TEXT DEFAULT '[]'",
    },
    AdditiveColumn {
        table: ManagedTable::Contributions,
        column: "attachments",
        sqlite: "TEXT NOT NULL DEFAULT '[]'",
        postgres: "TEXT NOT NULL DEFAULT '[]'",
    },
    AdditiveColumn {
        table: ManagedTable::Contributions,
        column: "saleApproval",
        sqlite: "TEXT DEFAULT NULL",
        postgres: "TEXT DEFAULT NULL",
    },
    AdditiveColumn {
        table: ManagedTable::Contributions,
        column: "year",
        sqlite: "INTEGER DEFAULT NULL",
        postgres: "INTEGER DEFAULT NULL",
    },
];

fn sqlite_ddl(table: ManagedTable) -> &'static str {
    match table {
        ManagedTable::Users => {
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                staffId TEXT NOT NULL UNIQUE,
                email TEXT NOT NULL UNIQUE,
                passwordHash TEXT NOT NULL,
                name TEXT NOT NULL DEFAULT '',
                role TEXT NOT NULL DEFAULT 'user' CHECK (role IN ('user', 'admin')),
                status TEXT NOT NULL DEFAULT 'pending'
                    CHECK (status IN ('pending', 'approved', 'rejected')),
                accountScopes TEXT NOT NULL DEFAULT '[]',
                saleContactNames TEXT NOT NULL DEFAULT '[]',
                saleContactEmails TEXT NOT NULL DEFAULT '[]',
                canViewOthers INTEGER NOT NULL DEFAULT 0,
                externalLinks TEXT DEFAULT '[]',
                createdAt TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updatedAt TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#
        }
        ManagedTable::Contributions => {
            r#"
            CREATE TABLE IF NOT EXISTS contributions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                userId INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                title TEXT NOT NULL DEFAULT '',
                contributionType TEXT NOT NULL DEFAULT '',
                impactTier TEXT NOT NULL DEFAULT '',
                effortTier TEXT NOT NULL DEFAULT '',
                description TEXT NOT NULL DEFAULT '',
                accountName TEXT,
                saleContactName TEXT,
                impactEstimate REAL NOT NULL DEFAULT 0,
                periodTag TEXT NOT NULL,
                year INTEGER DEFAULT NULL,
                status TEXT NOT NULL DEFAULT 'draft'
                    CHECK (status IN ('draft', 'submitted', 'approved', 'rejected')),
                tags TEXT NOT NULL DEFAULT '[]',
                attachments TEXT NOT NULL DEFAULT '[]',
                saleApproval TEXT DEFAULT NULL,
                createdAt TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updatedAt TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#
        }
        ManagedTable::ComplexProjects => {
            r#"
            CREATE TABLE IF NOT EXISTS complex_projects (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                userId INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                title TEXT NOT NULL DEFAULT '',
                description TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL CHECK (status IN ('win', 'loss', 'ongoing')),
                successFactors TEXT,
                lossReasons TEXT,
                year INTEGER NOT NULL,
                createdAt TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updatedAt TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#
        }
        ManagedTable::AppMeta => {
            r#"
            CREATE TABLE IF NOT EXISTS app_meta (
                key TEXT PRIMARY KEY,
                value TEXT
            )
            "#
        }
        ManagedTable::PublicReports => {
            r#"
            CREATE TABLE IF NOT EXISTS public_reports (
                key TEXT PRIMARY KEY,
                html TEXT NOT NULL DEFAULT '',
                generatedAt TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                generatedBy INTEGER,
                params TEXT NOT NULL DEFAULT '{}'
            )
            "#
        }
    }
}

fn postgres_ddl(table: ManagedTable) -> &'static str {
    match table {
        ManagedTable::Users => {
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id BIGSERIAL PRIMARY KEY,
                staffId TEXT NOT NULL UNIQUE,
                email TEXT NOT NULL UNIQUE,
                passwordHash TEXT NOT NULL,
                name TEXT NOT NULL DEFAULT '',
                role TEXT NOT NULL DEFAULT 'user' CHECK (role IN ('user', 'admin')),
                status TEXT NOT NULL DEFAULT 'pending'
                    CHECK (status IN ('pending', 'approved', 'rejected')),
                accountScopes TEXT NOT NULL DEFAULT '[]',
                saleContactNames TEXT NOT NULL DEFAULT '[]',
                saleContactEmails TEXT NOT NULL DEFAULT '[]',
                canViewOthers BOOLEAN NOT NULL DEFAULT FALSE,
                externalLinks TEXT DEFAULT '[]',
                createdAt TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updatedAt TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#
        }
        ManagedTable::Contributions => {
            r#"
            CREATE TABLE IF NOT EXISTS contributions (
                id BIGSERIAL PRIMARY KEY,
                userId BIGINT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                title TEXT NOT NULL DEFAULT '',
                contributionType TEXT NOT NULL DEFAULT '',
                impactTier TEXT NOT NULL DEFAULT '',
                effortTier TEXT NOT NULL DEFAULT '',
                description TEXT NOT NULL DEFAULT '',
                accountName TEXT,
                saleContactName TEXT,
                impactEstimate DOUBLE PRECISION NOT NULL DEFAULT 0,
                periodTag TEXT NOT NULL,
                year INTEGER DEFAULT NULL,
                status TEXT NOT NULL DEFAULT 'draft'
                    CHECK (status IN ('draft', 'submitted', 'approved', 'rejected')),
                tags TEXT NOT NULL DEFAULT '[]',
                attachments TEXT NOT NULL DEFAULT '[]',
                saleApproval TEXT DEFAULT NULL,
                createdAt TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updatedAt TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#
        }
        ManagedTable::ComplexProjects => {
            r#"
            CREATE TABLE IF NOT EXISTS complex_projects (
                id BIGSERIAL PRIMARY KEY,
                userId BIGINT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                title TEXT NOT NULL DEFAULT '',
                description TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL CHECK (status IN ('win', 'loss', 'ongoing')),
                successFactors TEXT,
                lossReasons TEXT,
                year INTEGER NOT NULL,
                createdAt TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updatedAt TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#
        }
        ManagedTable::AppMeta => {
            r#"
            CREATE TABLE IF NOT EXISTS app_meta (
                key TEXT PRIMARY KEY,
                value TEXT
            )
            "#
        }
        ManagedTable::PublicReports => {
            r#"
            CREATE TABLE IF NOT EXISTS public_reports (
                key TEXT PRIMARY KEY,
                html TEXT NOT NULL DEFAULT '',
                generatedAt TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                generatedBy BIGINT,
                params TEXT NOT NULL DEFAULT '{}'
            )
            "#
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::{ContributionStatus, ProjectStatus, Role, UserStatus};

    #[test]
    fn test_ddl_lists_every_column() {
        for backend in [Backend::Sqlite, Backend::Postgres] {
            for table in ManagedTable::ALL {
                let ddl = table.create_sql(backend);
                assert!(ddl.contains(&format!("IF NOT EXISTS {} (", table.name())));
                for column in table.columns() {
                    assert!(
                        ddl.contains(&format!("\n                {column} ")),
                        "{backend} DDL for {} is missing {column}",
                        table.name()
                    );
                }
            }
        }
    }

    #[test]
    fn test_check_constraints_cover_domain_enums() {
        for backend in [Backend::Sqlite, Backend::Postgres] {
            let users = ManagedTable::Users.create_sql(backend);
            for role in Role::ALL {
                assert!(users.contains(&format!("'{role}'")));
            }
            for status in UserStatus::ALL {
                assert!(users.contains(&format!("'{status}'")));
            }
            let contributions = ManagedTable::Contributions.create_sql(backend);
            for status in ContributionStatus::ALL {
                assert!(contributions.contains(&format!("'{status}'")));
            }
            let projects = ManagedTable::ComplexProjects.create_sql(backend);
            for status in ProjectStatus::ALL {
                assert!(projects.contains(&format!("'{status}'")));
            }
        }
    }

    #[test]
    fn test_additive_columns_are_known_columns() {
        for added in ADDITIVE_COLUMNS {
            assert!(added.table.columns().contains(&added.column));
            let sql = added.alter_sql(Backend::Postgres);
            assert!(sql.starts_with(&format!("ALTER TABLE {} ADD COLUMN", added.table.name())));
        }
    }

    #[test]
    fn test_dependency_order_puts_users_first() {
        assert_eq!(ManagedTable::ALL[0], ManagedTable::Users);
        let envelope_keys: Vec<_> = ManagedTable::ALL.iter().map(|t| t.envelope_key()).collect();
        assert_eq!(
            envelope_keys,
            ["users", "contributions", "complexProjects", "appMeta", "publicReports"]
        );
    }

    #[test]
    fn test_column_case_restores_camel_case() {
        let case = column_case();
        assert_eq!(case.normalize("passwordhash"), "passwordHash");
        assert_eq!(case.normalize("periodtag"), "periodTag");
        assert_eq!(case.normalize("generatedat"), "generatedAt");
    }
}
