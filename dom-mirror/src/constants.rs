//! Constants used throughout dom-mirror.

/// Element names whose content is executable.
pub const EXECUTABLE_TAGS: &[&str] = &["script"];

/// Attribute through which an executable element loads external code.
pub const EXTERNAL_REF_ATTR: &str = "src";

/// Element names that carry a user-editable value.
pub const CONTROL_TAGS: &[&str] = &["input", "textarea", "select"];

/// First address handed out by an allocator.
pub const FIRST_ADDRESS: u32 = 1;

/// Deepest subtree nesting an inserted subtree may have. The encoder refuses
/// to emit deeper subtrees and the decoder rejects them.
pub const MAX_SUBTREE_DEPTH: usize = 512;

/// Wire tag for `InsertChildren`.
pub const OP_INSERT_CHILDREN: u8 = 1;
/// Wire tag for `RemoveChildren`.
pub const OP_REMOVE_CHILDREN: u8 = 2;
/// Wire tag for `SetCharacterData`.
pub const OP_SET_CHARACTER_DATA: u8 = 3;
/// Wire tag for `SetAttribute`.
pub const OP_SET_ATTRIBUTE: u8 = 4;
/// Wire tag for `ValueChanged`.
pub const OP_VALUE_CHANGED: u8 = 5;

/// Wire tag for an element node.
pub const NODE_ELEMENT: u8 = 1;
/// Wire tag for a text node.
pub const NODE_TEXT: u8 = 2;
/// Wire tag for a comment node.
pub const NODE_COMMENT: u8 = 3;
/// Wire tag for a document type node.
pub const NODE_DOCTYPE: u8 = 4;
