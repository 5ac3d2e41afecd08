use std::sync::OnceLock;

use tabled::{settings::Style, Table, Tabled};

use crate::container::Container;

static QUIET: OnceLock<bool> = OnceLock::new();

pub fn is_quiet() -> bool {
    *QUIET.get_or_init(|| {
        std::env::var("RECEPTORDB_QUIET")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    })
}

#[derive(Tabled)]
pub struct FieldRow {
    #[tabled(rename = "Field")]
    pub field: String,
    #[tabled(rename = "State")]
    pub state: &'static str,
    #[tabled(rename = "Value")]
    pub value: String,
}

impl From<&Container> for FieldRow {
    fn from(container: &Container) -> Self {
        match container {
            Container::Active(active) => FieldRow {
                field: active.variable().id().to_string(),
                state: "active",
                value: active.value().to_string(),
            },
            Container::Inactive(inactive) => FieldRow {
                field: inactive.name().to_string(),
                state: "inactive",
                value: inactive.raw().to_string(),
            },
        }
    }
}

/// Render a receptor's containers, one row per field
pub fn containers_table(containers: &[Container]) -> String {
    if containers.is_empty() {
        return String::new();
    }
    let rows: Vec<FieldRow> = containers.iter().map(FieldRow::from).collect();
    Table::new(&rows).with(Style::rounded()).to_string()
}
