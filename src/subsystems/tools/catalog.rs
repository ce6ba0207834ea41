//! Tool definitions advertised through `tools/list`.

use serde::Serialize;
use serde_json::{Value, json};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ToolDef {
    pub name: &'static str,
    pub description: &'static str,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

fn tool(name: &'static str, description: &'static str, properties: Value, required: &[&str]) -> ToolDef {
    ToolDef {
        name,
        description,
        input_schema: json!({
            "type": "object",
            "properties": properties,
            "required": required,
        }),
    }
}

fn string(description: &str) -> Value {
    json!({ "type": "string", "description": description })
}

fn integer(description: &str, minimum: u64) -> Value {
    json!({ "type": "integer", "description": description, "minimum": minimum })
}

fn number(description: &str) -> Value {
    json!({ "type": "number", "description": description })
}

const SCRIPT_CONTENT: &str = "Python source defining add_scene_content(parent_node).";

pub fn definitions() -> Vec<ToolDef> {
    vec![
        // Scene scripting
        tool(
            "validate_scene",
            "Validates a SOFA scene snippet by initializing and animating one step (dt=0.01).",
            json!({ "script_content": string(SCRIPT_CONTENT) }),
            &["script_content"],
        ),
        tool(
            "summarize_scene",
            "Summarizes the scene graph (nodes/objects) and runs basic checks.",
            json!({ "script_content": string(SCRIPT_CONTENT) }),
            &["script_content"],
        ),
        tool(
            "write_scene",
            "Writes a generated SOFA scene file to disk without running validation.",
            json!({
                "script_content": string(SCRIPT_CONTENT),
                "output_filename": string("Destination path; parent directories are created."),
            }),
            &["script_content", "output_filename"],
        ),
        tool(
            "write_and_test_scene",
            "Validates a SOFA scene (init plus one step at dt=0.01) and writes it to disk only if validation succeeds.",
            json!({
                "script_content": string(SCRIPT_CONTENT),
                "output_filename": string("Destination path; parent directories are created."),
            }),
            &["script_content", "output_filename"],
        ),
        tool(
            "load_scene",
            "Loads an existing scene file from disk and returns its contents.",
            json!({ "scene_path": string("Path to the scene file.") }),
            &["scene_path"],
        ),
        tool(
            "patch_scene",
            "Applies a structured text patch (replace, insert_before, insert_after, append, prepend) to an existing scene file. All operations apply or none do.",
            json!({
                "scene_path": string("Path to the scene file."),
                "patch": {
                    "description": "One operation object or a non-empty list of them, each with an 'op' field.",
                    "oneOf": [
                        { "type": "object" },
                        { "type": "array", "items": { "type": "object" }, "minItems": 1 }
                    ]
                },
            }),
            &["scene_path", "patch"],
        ),
        tool(
            "update_data_field",
            "Sets one keyword argument on the addObject call with the given name= in a scene file.",
            json!({
                "scene_path": string("Path to the scene file."),
                "object_name": string("Value of the object's name= keyword."),
                "field_name": string("Keyword argument to replace or add."),
                "new_value": { "description": "New value, rendered as a Python literal." },
            }),
            &["scene_path", "object_name", "field_name", "new_value"],
        ),
        // Mesh inspection
        tool(
            "get_mesh_bounding_box",
            "Reads a mesh file and returns its bounding box.",
            json!({ "mesh_path": string("Path to a .vtk, .msh, .obj, .stl or .ply file.") }),
            &["mesh_path"],
        ),
        tool(
            "inspect_mesh_topology",
            "Reads a mesh file and determines if it is a volumetric or surface mesh.",
            json!({ "mesh_path": string("Path to a .vtk, .msh, .obj, .stl or .ply file.") }),
            &["mesh_path"],
        ),
        tool(
            "resolve_asset_path",
            "Resolves an asset path (~ expansion + absolute path) and checks existence.",
            json!({ "path": string("Path as given by the user.") }),
            &["path"],
        ),
        tool(
            "mesh_stats",
            "Returns mesh statistics (bbox, topology, counts) useful for scene generation.",
            json!({ "mesh_path": string("Path to a .vtk, .msh, .obj, .stl or .ply file.") }),
            &["mesh_path"],
        ),
        tool(
            "find_mesh_vertices",
            "Finds vertex indices matching an axis-aligned predicate, e.g. all vertices at the minimum z for fixed constraints.",
            json!({
                "mesh_path": string("Path to a .vtk, .msh, .obj, .stl or .ply file."),
                "selector": {
                    "type": "object",
                    "description": "{axis: x|y|z, op: lt|le|gt|ge|eq|between|at_min|at_max, value?, min?, max?, tolerance?} or {box_min: [x,y,z], box_max: [x,y,z], tolerance?}.",
                },
                "limit": integer("Maximum number of indices returned (default 1000).", 1),
            }),
            &["mesh_path", "selector"],
        ),
        // Sandbox
        tool(
            "run_math_script",
            "Runs a Python script in a sandboxed environment.",
            json!({ "script": string("Python source; printed output is returned.") }),
            &["script"],
        ),
        // Component registry
        tool(
            "query_sofa_component",
            "Queries the SOFA component registry for a component.",
            json!({ "component_name": string("Exact SOFA class name, e.g. MechanicalObject.") }),
            &["component_name"],
        ),
        tool(
            "search_sofa_components",
            "Searches SOFA's registered components by a fuzzy query (substring/prefix).",
            json!({
                "query": string("Search text; a trailing * switches to prefix mode."),
                "limit": integer("Maximum number of matches (default 50).", 0),
            }),
            &["query"],
        ),
        tool(
            "find_component_plugin",
            "Finds the plugin that provides a SOFA component class.",
            json!({ "component_name": string("SOFA class name (case-insensitive fallback).") }),
            &["component_name"],
        ),
        tool(
            "refresh_component_cache",
            "Discards the component-to-plugin cache and rebuilds it from the registry.",
            json!({}),
            &[],
        ),
        // Simulation
        tool(
            "run_and_extract",
            "Runs the simulation for a number of steps and extracts one data field after each step.",
            json!({
                "scene_path": string("Path to a scene file defining createScene(rootNode)."),
                "steps": integer("Number of animation steps.", 0),
                "dt": number("Time step."),
                "node_path": string("Slash-separated node path; the last segment may name an object, e.g. 'solver_node/mo'."),
                "field": string("Data field name, e.g. 'position'."),
            }),
            &["scene_path", "steps", "dt", "node_path", "field"],
        ),
        tool(
            "record_simulation",
            "Runs the simulation like run_and_extract and saves the samples as a time-series JSON file.",
            json!({
                "scene_path": string("Path to a scene file defining createScene(rootNode)."),
                "steps": integer("Number of animation steps.", 0),
                "dt": number("Time step."),
                "node_path": string("Slash-separated node path; the last segment may name an object."),
                "field": string("Data field name."),
                "output_path": string("Destination of the time-series file."),
            }),
            &["scene_path", "steps", "dt", "node_path", "field", "output_path"],
        ),
        tool(
            "analyze_simulation_results",
            "Loads a recorded time series, slices it by step and computes displacement and stability metrics.",
            json!({
                "data_path": string("Path to a file written by record_simulation."),
                "start_step": integer("First step included.", 0),
                "end_step": integer("First step excluded.", 0),
                "indices": { "type": "array", "items": { "type": "integer", "minimum": 0 }, "description": "Rows kept from each snapshot." },
                "metrics": { "type": "array", "items": { "type": "string", "enum": ["displacement", "stability"] } },
                "include_data": { "type": "boolean", "description": "Return the sliced samples too." },
                "settle_tolerance": number("Final step delta below which the run counts as settled (default 1e-6)."),
                "explosion_threshold": number("Peak displacement above which the run counts as exploded (default 1e6)."),
            }),
            &["data_path"],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn names_are_unique_and_complete() {
        let defs = definitions();
        let names: HashSet<&str> = defs.iter().map(|d| d.name).collect();
        assert_eq!(names.len(), defs.len());
        assert_eq!(defs.len(), 20);
        for name in ["validate_scene", "find_mesh_vertices", "analyze_simulation_results", "update_data_field"] {
            assert!(names.contains(name), "{name}");
        }
    }

    #[test]
    fn schemas_are_objects_with_required_lists() {
        for def in definitions() {
            assert_eq!(def.input_schema["type"], "object", "{}", def.name);
            assert!(def.input_schema["required"].is_array(), "{}", def.name);
            let v = serde_json::to_value(&def).unwrap();
            assert!(v.get("inputSchema").is_some());
        }
    }
}
