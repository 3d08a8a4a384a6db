use hcl::{
    eval::{Context, FuncArgs},
    Value,
};

pub struct HclFormat;
impl figment::providers::Format for HclFormat {
    type Error = hcl::Error;

    const NAME: &'static str = "HCL";

    fn from_str<'de, T: serde::de::DeserializeOwned>(string: &'de str) -> Result<T, Self::Error> {
        hcl::eval::from_str(string, &get_hcl_context())
    }
}

fn string_arg(args: &FuncArgs) -> Result<&str, String> {
    args.first()
        .and_then(Value::as_str)
        .ok_or_else(|| "expected a string argument".to_string())
}

/// Reads another HCL document, e.g. a shared CA repository table.
/// Not part of the HCL specification.
/// Example:
/// ```hcl
/// ca_repository = import("/etc/certchain/ca_repository.hcl")
/// ```
fn read_hcl_file(args: FuncArgs) -> Result<Value, String> {
    let path = string_arg(&args)?;
    if !path.ends_with(".hcl") {
        return Err(format!("File must be a HCL file: {path}"));
    }

    let contents =
        std::fs::read_to_string(path).map_err(|err| format!("file not found: {path} ({err})"))?;

    hcl::from_str(&contents)
        .map(Value::Object)
        .map_err(|err| format!("invalid HCL in {path}: {err}"))
}

/// Retrieves an environment variable. The variable must be defined.
/// Not part of the HCL specification.
/// Example:
/// ```hcl
/// logging {
///   path = env("CERTCHAIN_LOG_DIR")
/// }
/// ```
fn get_env_var(args: FuncArgs) -> Result<Value, String> {
    let key = string_arg(&args)?;
    std::env::var(key)
        .map(Value::String)
        .map_err(|_| format!("Environment variable {key} not found"))
}

/// Get the HCL context for figment
fn get_hcl_context<'a>() -> Context<'a> {
    let env_func = hcl::eval::FuncDef::builder()
        .param(hcl::eval::ParamType::String)
        .build(get_env_var);

    let read_file_func = hcl::eval::FuncDef::builder()
        .param(hcl::eval::ParamType::String)
        .build(read_hcl_file);

    let mut context = hcl::eval::Context::new();
    context.declare_func("env", env_func);
    context.declare_func("import", read_file_func);

    context
}

/// HashiCorp Configuration Language (HCL) provider for figment
pub type Hcl = figment::providers::Data<HclFormat>;
