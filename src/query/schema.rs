//! Declarative filter/sort allow-lists, one per listable entity.
//!
//! A [`FilterSchema`] is the single source of truth for what a list endpoint
//! accepts: which columns may be filtered, with which operators, what value
//! type each column carries, and which columns may be sorted on. Column names
//! only ever enter SQL from these tables, never from request input.

/// Value type a filterable column declares. Drives validation only — all
/// values are bound as text, SQLite affinity does the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    String,
    Enum,
    Date,
}

#[derive(Debug)]
pub struct FieldSchema {
    /// Column name, also the request-facing field name.
    pub column: &'static str,
    /// Operators permitted for this column.
    pub operators: &'static [&'static str],
    pub value_type: ValueType,
    /// Accepted members when `value_type` is [`ValueType::Enum`].
    pub enum_values: &'static [&'static str],
}

#[derive(Debug)]
pub struct FilterSchema {
    pub table: &'static str,
    pub filterable: &'static [FieldSchema],
    pub sortable: &'static [&'static str],
}

impl FilterSchema {
    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.filterable.iter().find(|f| f.column == name)
    }

    pub fn is_sortable(&self, name: &str) -> bool {
        self.sortable.contains(&name)
    }
}

// ─── Entity schemas ──────────────────────────────────────────────────────────

static TASKS: FilterSchema = FilterSchema {
    table: "tasks",
    filterable: &[
        FieldSchema {
            column: "title",
            operators: &["like", "="],
            value_type: ValueType::String,
            enum_values: &[],
        },
        FieldSchema {
            column: "status",
            operators: &["="],
            value_type: ValueType::Enum,
            enum_values: &["pending", "in_progress", "completed", "canceled"],
        },
        FieldSchema {
            column: "due_date",
            operators: &["=", ">", "<", ">=", "<=", "between"],
            value_type: ValueType::Date,
            enum_values: &[],
        },
    ],
    sortable: &["id", "title", "status", "due_date", "created_at"],
};

static TASK_HISTORIES: FilterSchema = FilterSchema {
    table: "task_histories",
    filterable: &[
        FieldSchema {
            column: "field_changed",
            operators: &["like"],
            value_type: ValueType::String,
            enum_values: &[],
        },
        FieldSchema {
            column: "changed_at",
            operators: &["=", ">=", "<=", "between"],
            value_type: ValueType::Date,
            enum_values: &[],
        },
    ],
    sortable: &["field_changed", "old_value", "new_value", "changed_at"],
};

pub fn tasks() -> &'static FilterSchema {
    &TASKS
}

pub fn task_histories() -> &'static FilterSchema {
    &TASK_HISTORIES
}
