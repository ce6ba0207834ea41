//! Scene source assembly: fixed header/solver boilerplate around a
//! user-supplied `add_scene_content(parent_node)` fragment.

use std::sync::LazyLock;

use regex::Regex;

const UTILITIES: &str = r#"
def add_header(root_node):
    root_node.addObject("RequiredPlugin", pluginName="Sofa.Component.AnimationLoop")
    root_node.addObject("RequiredPlugin", pluginName="Sofa.Component.Constraint.Lagrangian.Solver")
    root_node.addObject("RequiredPlugin", pluginName="Sofa.Component.ODESolver.Backward")
    root_node.addObject("RequiredPlugin", pluginName="Sofa.Component.LinearSolver.Direct")
    root_node.addObject("RequiredPlugin", pluginName="Sofa.Component.Constraint.Lagrangian.Correction")
    root_node.addObject("RequiredPlugin", pluginName="Sofa.Component.StateContainer")
    root_node.addObject("RequiredPlugin", pluginName="Sofa.Component.Visual")
    root_node.addObject("VisualStyle", displayFlags="showBehavior showBehaviorModels")
    root_node.addObject(
        "FreeMotionAnimationLoop",
        name="AnimationLoop",
        parallelCollisionDetectionAndFreeMotion=False,
        parallelODESolving=False,
    )
    root_node.addObject(
        "NNCGConstraintSolver",
        name="ConstraintSolver",
    )


def add_solver(root_node):
    solver_node = root_node.addChild("solver_node")
    solver_node.addObject(
        "EulerImplicitSolver",
        firstOrder=False,
        rayleighStiffness=0.1,
        rayleighMass=0.1,
        vdamping=0.1,
    )
    solver_node.addObject(
        "SparseLDLSolver",
        name="Solver",
        template="CompressedRowSparseMatrixMat3x3d",
        parallelInverseProduct=True,
    )
    solver_node.addObject(
        "GenericConstraintCorrection",
        name="ConstraintCorrection",
    )
    return solver_node
"#;

const CREATE_SCENE: &str = r#"
def createScene(rootNode):
    add_header(rootNode)
    solver_node = add_solver(rootNode)

    if 'add_scene_content' in globals():
        add_scene_content(solver_node)
    else:
        raise NameError("The provided script_content must define a function called 'add_scene_content(parent_node)'.")
"#;

/// Message used when a fragment lacks the content callback.
pub const MISSING_CALLBACK: &str =
    "The provided script_content must define a function called 'add_scene_content(parent_node)'.";

/// Baseline objects created by `add_solver` under `solver_node`.
pub const SOLVER_BASELINE_CLASSES: [&str; 3] =
    ["EulerImplicitSolver", "SparseLDLSolver", "GenericConstraintCorrection"];

static CALLBACK_DEF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:async[ \t]+)?def[ \t]+add_scene_content[ \t]*\(")
        .unwrap_or_else(|e| panic!("bad regex: {e}"))
});

/// Assemble a complete scene module from a fragment.
pub fn build_scene_source(fragment: &str) -> String {
    format!("{UTILITIES}\n# User content: must define add_scene_content(parent_node)\n{fragment}\n{CREATE_SCENE}")
}

/// Cheap static check for an `add_scene_content` definition.
pub fn defines_callback(fragment: &str) -> bool {
    CALLBACK_DEF.is_match(fragment)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAGMENT: &str = "def add_scene_content(parent_node):\n    parent_node.addObject('MechanicalObject', name='mo')\n";

    #[test]
    fn source_contains_boilerplate_fragment_and_entry_point() {
        let src = build_scene_source(FRAGMENT);
        let header = src.find("def add_header").unwrap();
        let fragment = src.find("def add_scene_content").unwrap();
        let entry = src.find("def createScene(rootNode)").unwrap();
        assert!(header < fragment && fragment < entry);
        assert!(src.contains("name=\"AnimationLoop\""));
        assert!(src.contains("name=\"ConstraintCorrection\""));
        assert!(src.contains(MISSING_CALLBACK));
    }

    #[test]
    fn detects_callback_definition() {
        assert!(defines_callback(FRAGMENT));
        assert!(defines_callback("import math\n\n  def  add_scene_content (node):\n    pass\n"));
        assert!(!defines_callback("def add_content(parent_node):\n    pass\n"));
        assert!(!defines_callback("# def add_scene_content(parent_node):\n"));
        assert!(!defines_callback("x = 'def add_scene_content('"));
    }
}
