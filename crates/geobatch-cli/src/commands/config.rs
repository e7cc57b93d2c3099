use anyhow::Result;
use serde::Serialize;
use tabled::Tabled;

use geobatch_core::config::LayeredConfig;

use crate::output::OutputWriter;

#[derive(Debug, Serialize, Tabled)]
struct ConfigRow {
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Source")]
    source: String,
}

pub fn execute(config: &LayeredConfig, output: &OutputWriter) -> Result<()> {
    let mut rows: Vec<ConfigRow> = config
        .to_inspection_map()
        .into_iter()
        .map(|(key, (value, source))| ConfigRow { key, value, source: format!("{:?}", source) })
        .collect();
    rows.sort_by(|a, b| a.key.cmp(&b.key));

    if let Err(e) = config.validate() {
        output.warning(format!("Configuration is invalid: {}", e));
    }

    if output.is_json() {
        output.result(&rows)?;
    } else {
        output.section("Configuration");
        output.table(rows);
    }
    Ok(())
}
