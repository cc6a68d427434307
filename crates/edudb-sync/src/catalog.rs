//! The table catalog: every synced table, in dependency order.
//!
//! Order matters twice. Inserts walk the list forward so parents exist
//! before children reference them; restore deletes walk it backward so
//! children disappear before their parents. `users` stays first because
//! every user-owned table hangs off it.

/// One synced table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableDescriptor {
    pub name: &'static str,
    pub primary_key: &'static str,
    /// Column referencing `users.id`, when the table is user-owned.
    pub user_fk: Option<&'static str>,
}

pub const USERS_TABLE: &str = "users";
pub const USER_EMAIL_COLUMN: &str = "email";
pub const MATERIALS_TABLE: &str = "materials";

static TABLES: &[TableDescriptor] = &[
    TableDescriptor {
        name: "users",
        primary_key: "id",
        user_fk: None,
    },
    TableDescriptor {
        name: "categories",
        primary_key: "id",
        user_fk: None,
    },
    TableDescriptor {
        name: "materials",
        primary_key: "id",
        user_fk: Some("user_id"),
    },
    TableDescriptor {
        name: "html_files",
        primary_key: "id",
        user_fk: Some("user_id"),
    },
    TableDescriptor {
        name: "pdf_files",
        primary_key: "id",
        user_fk: Some("user_id"),
    },
    TableDescriptor {
        name: "tests",
        primary_key: "id",
        user_fk: Some("user_id"),
    },
    TableDescriptor {
        name: "test_questions",
        primary_key: "id",
        user_fk: None,
    },
    TableDescriptor {
        name: "test_results",
        primary_key: "id",
        user_fk: Some("user_id"),
    },
    TableDescriptor {
        name: "assignments",
        primary_key: "id",
        user_fk: Some("user_id"),
    },
    TableDescriptor {
        name: "assignment_submissions",
        primary_key: "id",
        user_fk: Some("user_id"),
    },
    TableDescriptor {
        name: "schedule_events",
        primary_key: "id",
        user_fk: Some("user_id"),
    },
    TableDescriptor {
        name: "notes",
        primary_key: "id",
        user_fk: Some("user_id"),
    },
    TableDescriptor {
        name: "bookmarks",
        primary_key: "id",
        user_fk: Some("user_id"),
    },
    TableDescriptor {
        name: "progress",
        primary_key: "id",
        user_fk: Some("user_id"),
    },
    TableDescriptor {
        name: "notifications",
        primary_key: "id",
        user_fk: Some("user_id"),
    },
    TableDescriptor {
        name: "push_subscriptions",
        primary_key: "id",
        user_fk: Some("user_id"),
    },
    TableDescriptor {
        name: "feedback",
        primary_key: "id",
        user_fk: Some("user_id"),
    },
    TableDescriptor {
        name: "activity_log",
        primary_key: "id",
        user_fk: Some("user_id"),
    },
];

/// All tables in dependency order.
pub fn tables() -> &'static [TableDescriptor] {
    TABLES
}

/// The `users` descriptor, which sync handles separately.
pub fn users_table() -> &'static TableDescriptor {
    &TABLES[0]
}

/// Every table except `users`, in dependency order.
pub fn data_tables() -> impl Iterator<Item = &'static TableDescriptor> {
    TABLES.iter().filter(|t| t.name != USERS_TABLE)
}

/// Look up a table by name.
pub fn find(name: &str) -> Option<&'static TableDescriptor> {
    TABLES.iter().find(|t| t.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_users_comes_first() {
        assert_eq!(TABLES[0].name, USERS_TABLE);
        assert_eq!(users_table().name, USERS_TABLE);
    }

    #[test]
    fn test_no_duplicate_tables() {
        let names: HashSet<&str> = TABLES.iter().map(|t| t.name).collect();
        assert_eq!(names.len(), TABLES.len());
    }

    #[test]
    fn test_user_owned_tables_come_after_users() {
        let users_pos = TABLES.iter().position(|t| t.name == USERS_TABLE).unwrap();
        for (pos, table) in TABLES.iter().enumerate() {
            if table.user_fk.is_some() {
                assert!(pos > users_pos, "{} sits before users", table.name);
            }
        }
    }

    #[test]
    fn test_test_children_come_after_tests() {
        let tests_pos = TABLES.iter().position(|t| t.name == "tests").unwrap();
        let questions_pos = TABLES
            .iter()
            .position(|t| t.name == "test_questions")
            .unwrap();
        let results_pos = TABLES
            .iter()
            .position(|t| t.name == "test_results")
            .unwrap();
        assert!(questions_pos > tests_pos);
        assert!(results_pos > tests_pos);
    }

    #[test]
    fn test_data_tables_excludes_users() {
        assert!(data_tables().all(|t| t.name != USERS_TABLE));
        assert_eq!(data_tables().count(), TABLES.len() - 1);
    }

    #[test]
    fn test_find() {
        assert_eq!(find("materials").map(|t| t.name), Some(MATERIALS_TABLE));
        assert_eq!(find("materials").and_then(|t| t.user_fk), Some("user_id"));
        assert!(find("no_such_table").is_none());
    }

    #[test]
    fn test_every_primary_key_is_id() {
        assert!(TABLES.iter().all(|t| t.primary_key == "id"));
    }
}
