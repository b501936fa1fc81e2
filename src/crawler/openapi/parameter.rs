use serde_json::Value;

/// `$ref` 最多追幾層，避免循環參照
const MAX_REF_DEPTH: usize = 8;

/// 端點上宣告的參數（已展開 `$ref`）
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    /// path、query、header、cookie、body、formData
    pub location: String,
    pub required: bool,
    /// 由 default 或唯一的 enum 值推得的值
    pub value: Option<String>,
}

impl Parameter {
    fn from_value(raw: &Value) -> Option<Self> {
        let name = raw.get("name")?.as_str()?.to_string();
        let location = raw.get("in")?.as_str()?.to_string();
        // path 參數依規範一定是必填
        let required = location == "path"
            || raw.get("required").and_then(Value::as_bool).unwrap_or(false);

        Some(Parameter {
            name,
            location,
            required,
            value: preset_value(raw),
        })
    }

    fn same_slot(&self, other: &Parameter) -> bool {
        self.name == other.name && self.location == other.location
    }
}

/// 依 JSON pointer 展開 `#/parameters/x` 或 `#/components/parameters/x`
pub fn follow_ref<'a>(doc: &'a Value, mut node: &'a Value) -> Option<&'a Value> {
    for _ in 0..MAX_REF_DEPTH {
        match node.get("$ref").and_then(Value::as_str) {
            None => return Some(node),
            Some(reference) => {
                let pointer = reference.strip_prefix('#')?;
                node = doc.pointer(pointer)?;
            }
        }
    }

    None
}

/// 合併 path item 與 operation 兩層的參數，operation 層優先
pub fn collect(doc: &Value, path_item: &Value, operation: &Value) -> Vec<Parameter> {
    let mut params: Vec<Parameter> = Vec::new();

    for level in [path_item, operation] {
        let Some(list) = level.get("parameters").and_then(Value::as_array) else {
            continue;
        };

        for raw in list {
            let Some(param) = follow_ref(doc, raw).and_then(Parameter::from_value) else {
                continue;
            };

            match params.iter_mut().find(|p| p.same_slot(&param)) {
                Some(existing) => *existing = param,
                None => params.push(param),
            }
        }
    }

    params
}

/// 取出 default（Swagger 2 直接在參數上，OpenAPI 3 在 schema 內），
/// 沒有 default 時只接受恰好一個值的 enum
fn preset_value(raw: &Value) -> Option<String> {
    let schema = raw.get("schema");
    let default = raw
        .get("default")
        .or_else(|| schema.and_then(|s| s.get("default")));

    if let Some(value) = default.and_then(scalar_to_string) {
        return Some(value);
    }

    let choices = raw
        .get("enum")
        .or_else(|| schema.and_then(|s| s.get("enum")))
        .and_then(Value::as_array)?;

    match choices.as_slice() {
        [only] => scalar_to_string(only),
        _ => None,
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// 代入參數後的請求目標
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Target {
    pub path: String,
    pub query: Vec<(String, String)>,
}

impl Target {
    pub fn query_string(&self) -> String {
        self.query
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }
}

/// 將必填的 path / query 參數代入；缺值時回傳略過的原因
pub fn build_target(path: &str, params: &[Parameter]) -> Result<Target, String> {
    let mut target = Target {
        path: path.to_string(),
        query: Vec::new(),
    };

    for param in params {
        match param.location.as_str() {
            "path" => {
                let value = param.value.as_ref().ok_or_else(|| {
                    format!("required path parameter '{}' has no default", param.name)
                })?;
                target.path = target
                    .path
                    .replace(&format!("{{{}}}", param.name), &urlencoding::encode(value));
            }
            "query" if param.required => {
                let value = param.value.as_ref().ok_or_else(|| {
                    format!("required query parameter '{}' has no default", param.name)
                })?;
                target.query.push((param.name.clone(), value.clone()));
            }
            _ => {}
        }
    }

    if let Some(start) = target.path.find('{') {
        if target.path[start..].contains('}') {
            return Err(format!("path template '{}' is not resolvable", target.path));
        }
    }

    Ok(target)
}
