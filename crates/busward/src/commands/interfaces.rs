//! Driver module inspection.

use serde::Serialize;
use tabled::Tabled;

use busward_config::Config;
use busward_core::driver::{DefinitionStore, ModuleOrigin};
use busward_core::{CoreError, DriverRegistry};

use crate::cli::{GlobalOpts, InterfacesCommand};
use crate::error::CliError;
use crate::output;

#[derive(Debug, Clone, Serialize, Tabled)]
struct ModuleRow {
    #[tabled(rename = "Module")]
    module: String,
    #[tabled(rename = "Origin")]
    origin: String,
    #[tabled(rename = "Classes")]
    classes: String,
    #[tabled(rename = "Problem")]
    problem: String,
}

#[derive(Debug, Serialize)]
struct ModuleCode<'a> {
    module_name: &'a str,
    code: &'a str,
}

pub fn handle(
    cmd: InterfacesCommand,
    config: &Config,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let store = DefinitionStore::new(config.interfaces_dir());
    match cmd {
        InterfacesCommand::List => list(&store, global),
        InterfacesCommand::Show { module } => show(&store, &module, global),
    }
}

fn list(store: &DefinitionStore, global: &GlobalOpts) -> Result<(), CliError> {
    let mut registry = DriverRegistry::with_builtins()?;
    let mut rows: Vec<ModuleRow> = registry
        .list_modules()
        .into_iter()
        .map(|module| ModuleRow {
            classes: registry.classes(&module).join(", "),
            module,
            origin: "builtin".into(),
            problem: String::new(),
        })
        .collect();

    for (module, parsed) in store.load_all()? {
        let installed = parsed.and_then(|definition| registry.install_definition(&module, &definition));
        let row = match installed {
            Ok(()) => ModuleRow {
                classes: registry.classes(&module).join(", "),
                module,
                origin: "definition".into(),
                problem: String::new(),
            },
            Err(e) => ModuleRow {
                module,
                origin: "definition".into(),
                classes: String::new(),
                problem: e.to_string(),
            },
        };
        rows.push(row);
    }

    let out = output::render_list(global.output, &rows, ModuleRow::clone, |r| {
        r.module.clone()
    })?;
    output::print_output(&out)
}

fn show(store: &DefinitionStore, module: &str, global: &GlobalOpts) -> Result<(), CliError> {
    if DriverRegistry::with_builtins()?.origin(module) == Some(ModuleOrigin::Builtin) {
        return Err(CoreError::Unsupported {
            operation: "get_interface_code".into(),
            driver: format!("built-in module '{module}'"),
        }
        .into());
    }

    let code = store.read(module)?;
    let out = output::render_single(
        global.output,
        &ModuleCode {
            module_name: module,
            code: &code,
        },
        |c| c.code.trim_end().to_owned(),
    )?;
    output::print_output(&out)
}
