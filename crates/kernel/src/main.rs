//! Strainer CLI
//!
//! Resolves a query string against ad-hoc field declarations and prints the
//! resolved values together with the compiled SQL fragments.
//!
//! Usage:
//!   strainer --field age:int --field name:str --sort age --default-sort=-age 'age[gt]=18&sort=-name'

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde_json::json;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use strainer_kernel::config::{self, Settings};
use strainer_kernel::filter::{FieldSet, FieldType, FilterResolver, QueryParams};
use strainer_kernel::sorting::{NullsPolicy, SortingResolver};
use strainer_kernel::translate::Dialect;
use strainer_kernel::translate::raw_sql::{
    CompileOptions, CompiledStatement, compile_filters_and_sorting,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Filterable field as `name:type`, e.g. `age:int`, `email:str?`, `tags:list[str]`.
    #[arg(long = "field", value_name = "NAME:TYPE")]
    fields: Vec<String>,

    /// Sortable field, optionally with a nulls policy: `age` or `age:bigger`.
    #[arg(long = "sort", value_name = "NAME[:NULLS]")]
    sorts: Vec<String>,

    /// Sort tokens used when the query has no sort parameter, e.g. `-age,+name`.
    #[arg(long, allow_hyphen_values = true)]
    default_sort: Option<String>,

    /// Name of the sort query parameter.
    #[arg(long, default_value = "sort")]
    sort_param: String,

    /// SQL dialect of the compiled fragments (defaults to STRAINER_DEFAULT_DIALECT).
    #[arg(long)]
    dialect: Option<Dialect>,

    /// Number of the first positional placeholder.
    #[arg(long, default_value = "1")]
    arg_start: usize,

    /// Query string to resolve, with or without the leading `?`.
    query: String,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let args = Args::parse();
    let settings = Settings::from_env().context("failed to load settings")?;
    config::install(settings);

    let report = run(&args)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn run(args: &Args) -> Result<serde_json::Value> {
    let mut fields = FieldSet::builder();
    for spec in &args.fields {
        let (name, ty) = split_spec(spec)?;
        let ty: FieldType = ty
            .parse()
            .with_context(|| format!("invalid type in --field {spec}"))?;
        fields = fields.add(name, ty);
    }
    let filters = FilterResolver::new(fields.build().context("invalid field declarations")?);

    let mut sorting = SortingResolver::builder().alias(&args.sort_param);
    for spec in &args.sorts {
        sorting = match spec.split_once(':') {
            Some((name, nulls)) => {
                let policy: NullsPolicy = nulls
                    .parse()
                    .with_context(|| format!("invalid nulls policy in --sort {spec}"))?;
                sorting.field_with_nulls(name, policy)
            }
            None => sorting.field(spec.as_str()),
        };
    }
    if let Some(default) = &args.default_sort {
        sorting = sorting.default_sort([default.as_str()]);
    }
    let sorting = sorting.build().context("invalid sort declarations")?;

    let params = QueryParams::parse(&args.query);
    let mut errors = Vec::new();
    let filter_values = filters.resolve(&params).unwrap_or_else(|e| {
        errors.extend(e.detail);
        Default::default()
    });
    let sort_values = sorting.resolve(&params).unwrap_or_else(|e| {
        errors.extend(e.detail);
        Default::default()
    });
    if !errors.is_empty() {
        return Ok(json!({ "detail": errors }));
    }

    let mut options = CompileOptions::new().arg_start(args.arg_start);
    if let Some(dialect) = args.dialect {
        options = options.dialect(dialect);
    }
    let (where_clause, order_by) =
        compile_filters_and_sorting(&filter_values, &sort_values, &options)?;

    Ok(json!({
        "filters": filter_values,
        "sorting": sort_values,
        "where": where_clause.as_ref().map(fragment),
        "order_by": order_by.as_ref().map(fragment),
    }))
}

fn split_spec(spec: &str) -> Result<(&str, &str)> {
    match spec.split_once(':') {
        Some((name, ty)) if !name.is_empty() => Ok((name, ty)),
        _ => bail!("--field expects NAME:TYPE, got {spec}"),
    }
}

fn fragment(compiled: &CompiledStatement) -> serde_json::Value {
    let args: Vec<String> = compiled.args().iter().map(|v| format!("{v:?}")).collect();
    json!({
        "stmt": compiled.stmt(),
        "args": args,
        "arg_start": compiled.arg_start(),
        "end": compiled.end(),
    })
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
