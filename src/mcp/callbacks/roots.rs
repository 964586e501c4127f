use serde_json::{json, Value};

const FILE_SCHEME: &str = "file://";

/// `roots/list` result for the configured workspace roots.
pub fn list_roots(roots: &[String]) -> Value {
    let roots: Vec<Value> = roots
        .iter()
        .enumerate()
        .map(|(index, root)| {
            json!({
                "uri": file_uri(root),
                "name": format!("workspace_{index}"),
            })
        })
        .collect();
    json!({ "roots": roots })
}

fn file_uri(root: &str) -> String {
    if root.starts_with(FILE_SCHEME) {
        root.to_string()
    } else {
        format!("{FILE_SCHEME}{root}")
    }
}
