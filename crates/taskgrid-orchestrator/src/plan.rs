use serde_json::Value;
use std::collections::{HashMap, HashSet};
use taskgrid_core::{Complexity, Plan, PlanDefect, Priority, Task, TaskgridError, TaskgridResult};
use tracing::debug;

/// Default executor role assigned to tasks that declare none.
pub const FALLBACK_AGENT: &str = "general";

/// Turns loosely-structured plan input into a strictly validated [`Plan`].
///
/// Parse failures (malformed embedded JSON) are reported as
/// [`TaskgridError::PlanParse`]; structurally invalid plans are reported as
/// [`TaskgridError::PlanInvalid`] carrying every defect found.
pub struct PlanParser {
    fallback_agent: String,
}

impl Default for PlanParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Intermediate per-task fields read during the structural pass.
struct RawTask {
    id: Option<String>,
    description: String,
    agent: Option<String>,
    dependencies: Vec<String>,
    priority: Priority,
    context: Option<String>,
}

impl PlanParser {
    /// Create a parser using [`FALLBACK_AGENT`] for tasks without a role.
    pub fn new() -> Self {
        Self {
            fallback_agent: FALLBACK_AGENT.to_string(),
        }
    }

    /// Override the fallback executor role.
    pub fn with_fallback_agent(mut self, agent: impl Into<String>) -> Self {
        self.fallback_agent = agent.into();
        self
    }

    /// Parse and validate raw plan input.
    ///
    /// Accepts a bare task array or an object carrying a `tasks` array,
    /// optionally wrapped in Markdown code fences. On validation failure the
    /// returned error lists every structurally invalid task, never just the
    /// first.
    pub fn parse(&self, raw: &str) -> TaskgridResult<Plan> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(TaskgridError::Precondition {
                primitive: "plan.parse",
                message: "plan input is empty".to_string(),
            });
        }

        let payload = strip_fences(trimmed);
        let value: Value = serde_json::from_str(payload)
            .map_err(|e| TaskgridError::PlanParse(format!("malformed plan JSON: {e}")))?;

        let (raw_tasks, top) = match &value {
            Value::Array(items) => (items.as_slice(), None),
            Value::Object(map) => match map.get("tasks") {
                Some(Value::Array(items)) => (items.as_slice(), Some(map)),
                Some(_) => {
                    return Err(TaskgridError::PlanInvalid(vec![PlanDefect::for_plan(
                        "`tasks` must be an array",
                    )]))
                }
                None => {
                    return Err(TaskgridError::PlanInvalid(vec![PlanDefect::for_plan(
                        "object plan must carry a `tasks` array",
                    )]))
                }
            },
            _ => {
                return Err(TaskgridError::PlanInvalid(vec![PlanDefect::for_plan(
                    "plan must be a task array or an object with a `tasks` array",
                )]))
            }
        };

        // Structural pass: every defective task is reported.
        let mut defects = Vec::new();
        let mut parsed: Vec<RawTask> = Vec::with_capacity(raw_tasks.len());
        for (pos, item) in raw_tasks.iter().enumerate() {
            let index = pos + 1;
            match self.read_task(index, item, &mut defects) {
                Some(raw) => parsed.push(raw),
                None => continue,
            }
        }
        if !defects.is_empty() {
            return Err(TaskgridError::PlanInvalid(defects));
        }

        // Normalize: default missing ids to 1-based position.
        let tasks: Vec<Task> = parsed
            .into_iter()
            .enumerate()
            .map(|(pos, raw)| {
                let id = raw.id.unwrap_or_else(|| (pos + 1).to_string());
                let agent = raw
                    .agent
                    .unwrap_or_else(|| self.fallback_agent.clone());
                let mut task = Task::new(id, raw.description, agent)
                    .with_dependencies(raw.dependencies)
                    .with_priority(raw.priority);
                task.context = raw.context;
                task
            })
            .collect();

        // Referential pass: unique ids, no dangling dependencies.
        let ids: HashSet<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
        let mut seen: HashSet<&str> = HashSet::new();
        for (pos, task) in tasks.iter().enumerate() {
            if !seen.insert(task.id.as_str()) {
                defects.push(PlanDefect::for_task(
                    pos + 1,
                    Some(task.id.clone()),
                    "duplicate task id",
                ));
            }
            let dangling: Vec<&str> = task
                .dependencies
                .iter()
                .map(String::as_str)
                .filter(|dep| !ids.contains(dep))
                .collect();
            if !dangling.is_empty() {
                defects.push(PlanDefect::for_task(
                    pos + 1,
                    Some(task.id.clone()),
                    format!(
                        "dependencies reference unknown task id(s): {}",
                        dangling.join(", ")
                    ),
                ));
            }
        }
        if !defects.is_empty() {
            return Err(TaskgridError::PlanInvalid(defects));
        }

        // A plan with a dependency cycle would stall scheduling silently,
        // so fail fast here.
        if let Some(cycle) = find_cycle(&tasks) {
            return Err(TaskgridError::PlanInvalid(vec![PlanDefect::for_plan(
                format!("dependency cycle: {}", cycle.join(" -> ")),
            )]));
        }

        let parallel_groups = self.read_groups(top, &ids, &mut defects);
        if !defects.is_empty() {
            return Err(TaskgridError::PlanInvalid(defects));
        }
        let parallel_groups = parallel_groups
            .filter(|groups| !groups.is_empty())
            .unwrap_or_else(|| vec![tasks.iter().map(|t| t.id.clone()).collect()]);

        let objective = top
            .and_then(|map| map.get("objective"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let complexity = top
            .and_then(|map| map.get("complexity"))
            .and_then(Value::as_str)
            .map(Complexity::parse)
            .unwrap_or_default();
        let estimated_time = top
            .and_then(|map| map.get("estimatedTime"))
            .and_then(id_like);

        debug!(
            tasks = tasks.len(),
            groups = parallel_groups.len(),
            "plan validated"
        );

        Ok(Plan {
            objective,
            complexity,
            tasks,
            parallel_groups,
            estimated_time,
        })
    }

    /// Read one task object, accumulating a defect per violated field.
    /// Returns `None` when the element is not an object at all.
    fn read_task(
        &self,
        index: usize,
        item: &Value,
        defects: &mut Vec<PlanDefect>,
    ) -> Option<RawTask> {
        let Some(obj) = item.as_object() else {
            defects.push(PlanDefect::for_task(index, None, "task must be an object"));
            return None;
        };

        let id = match obj.get("id") {
            None => None,
            Some(v) => match id_like(v) {
                Some(s) => Some(s),
                None => {
                    defects.push(PlanDefect::for_task(
                        index,
                        None,
                        "id must be a string or number",
                    ));
                    None
                }
            },
        };

        let description = match obj.get("task").or_else(|| obj.get("description")) {
            Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
            Some(Value::String(_)) => {
                defects.push(PlanDefect::for_task(
                    index,
                    id.clone(),
                    "description must not be empty",
                ));
                String::new()
            }
            Some(_) => {
                defects.push(PlanDefect::for_task(
                    index,
                    id.clone(),
                    "description must be a string",
                ));
                String::new()
            }
            None => {
                defects.push(PlanDefect::for_task(
                    index,
                    id.clone(),
                    "missing required `task`/`description` field",
                ));
                String::new()
            }
        };

        let mut dependencies = Vec::new();
        match obj.get("dependencies") {
            None => {}
            Some(Value::Array(items)) => {
                for dep in items {
                    match id_like(dep) {
                        Some(s) => dependencies.push(s),
                        None => {
                            defects.push(PlanDefect::for_task(
                                index,
                                id.clone(),
                                "dependencies must be a list of string or number ids",
                            ));
                            break;
                        }
                    }
                }
            }
            Some(_) => {
                defects.push(PlanDefect::for_task(
                    index,
                    id.clone(),
                    "dependencies must be a list",
                ));
            }
        }

        let agent = match obj.get("agent") {
            None => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => {
                defects.push(PlanDefect::for_task(
                    index,
                    id.clone(),
                    "agent must be a string",
                ));
                None
            }
        };

        let priority = match obj.get("priority") {
            None => Priority::default(),
            Some(Value::String(s)) => match Priority::parse(s) {
                Some(p) => p,
                None => {
                    defects.push(PlanDefect::for_task(
                        index,
                        id.clone(),
                        format!("unknown priority `{s}`"),
                    ));
                    Priority::default()
                }
            },
            Some(_) => {
                defects.push(PlanDefect::for_task(
                    index,
                    id.clone(),
                    "priority must be a string",
                ));
                Priority::default()
            }
        };

        let context = obj
            .get("context")
            .and_then(Value::as_str)
            .map(ToString::to_string);

        Some(RawTask {
            id,
            description,
            agent,
            dependencies,
            priority,
            context,
        })
    }

    /// Read and validate the optional `parallelGroups` field.
    fn read_groups(
        &self,
        top: Option<&serde_json::Map<String, Value>>,
        ids: &HashSet<&str>,
        defects: &mut Vec<PlanDefect>,
    ) -> Option<Vec<Vec<String>>> {
        let value = top.and_then(|map| map.get("parallelGroups"))?;
        let Value::Array(groups) = value else {
            defects.push(PlanDefect::for_plan(
                "parallelGroups must be an array of task-id lists",
            ));
            return None;
        };

        let mut normalized = Vec::with_capacity(groups.len());
        for (g, group) in groups.iter().enumerate() {
            let Value::Array(members) = group else {
                defects.push(PlanDefect::for_plan(format!(
                    "parallel group {} must be an array of task ids",
                    g + 1
                )));
                continue;
            };
            let mut out = Vec::with_capacity(members.len());
            for member in members {
                match id_like(member) {
                    Some(id) if ids.contains(id.as_str()) => out.push(id),
                    Some(id) => defects.push(PlanDefect::for_plan(format!(
                        "parallel group {} references unknown task id `{id}`",
                        g + 1
                    ))),
                    None => defects.push(PlanDefect::for_plan(format!(
                        "parallel group {} members must be string or number ids",
                        g + 1
                    ))),
                }
            }
            normalized.push(out);
        }
        Some(normalized)
    }
}

/// Normalize a JSON string or number into a task-id string.
fn id_like(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Strip a Markdown code fence (with optional language tag) wrapped around
/// the embedded plan data. Input without fences passes through untouched.
fn strip_fences(raw: &str) -> &str {
    let Some(start) = raw.find("```") else {
        return raw;
    };
    let after = &raw[start + 3..];
    let body = match after.find('\n') {
        Some(nl) => &after[nl + 1..],
        None => after,
    };
    match body.find("```") {
        Some(end) => body[..end].trim(),
        None => body.trim(),
    }
}

/// Three-color depth-first search over the dependency graph.
/// Returns the offending path when a cycle exists.
fn find_cycle(tasks: &[Task]) -> Option<Vec<String>> {
    let deps: HashMap<&str, &[String]> = tasks
        .iter()
        .map(|t| (t.id.as_str(), t.dependencies.as_slice()))
        .collect();
    let mut color: HashMap<&str, u8> = HashMap::new();
    for task in tasks {
        let mut path = Vec::new();
        if let Some(cycle) = visit(task.id.as_str(), &deps, &mut color, &mut path) {
            return Some(cycle);
        }
    }
    None
}

fn visit<'a>(
    id: &'a str,
    deps: &HashMap<&'a str, &'a [String]>,
    color: &mut HashMap<&'a str, u8>,
    path: &mut Vec<&'a str>,
) -> Option<Vec<String>> {
    match color.get(id) {
        // back edge: the path from the first occurrence of `id` is the cycle
        Some(1) => {
            let start = path.iter().position(|p| *p == id).unwrap_or(0);
            let mut cycle: Vec<String> = path[start..].iter().map(ToString::to_string).collect();
            cycle.push(id.to_string());
            return Some(cycle);
        }
        Some(_) => return None,
        None => {}
    }
    color.insert(id, 1);
    path.push(id);
    if let Some(ds) = deps.get(id) {
        for dep in ds.iter() {
            if let Some(cycle) = visit(dep, deps, color, path) {
                return Some(cycle);
            }
        }
    }
    path.pop();
    color.insert(id, 2);
    None
}
