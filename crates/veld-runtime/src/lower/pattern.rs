//! Match lowering and pattern tests
//!
//! A match pushes its subject once, marks the depth with a stack label, and
//! then tries each branch in order. A branch's pattern lowers to a comparison
//! tree that leaves one boolean on the stack; JZ skips the body when it is
//! false. Pattern-bound names address the subject bytes through
//! `(stack label, delta)` pairs, delta measured upward from the subject's
//! base: the sum tag sits at delta 0, a constructor payload at delta 1,
//! tuple fields at the sum of the preceding field sizes.

use super::{Lowered, Lowerer};
use crate::ast::{NodeId, NodeKind};
use crate::core::{CoreData, CoreId, CoreKind};
use crate::error::CompileError;
use crate::types::Type;

impl<'a> Lowerer<'a> {
    pub(super) fn lower_match(
        &mut self,
        parent: CoreId,
        id: NodeId,
    ) -> Result<Lowered, CompileError> {
        let children = self.ast.children(id).to_vec();
        if children.len() < 2 {
            return Err(CompileError::Lower("match without branches".into()));
        }
        let subject = children[0];
        if self.ast.get(subject).kind != NodeKind::Identifier {
            return Err(CompileError::Lower(
                "match subject must be an identifier".into(),
            ));
        }

        // Mark the subject's base depth, then push the subject.
        let stack_label = self.fun.new_stack_label();
        let marker = self.core.create_node(CoreKind::StackLabel, parent);
        self.core.get_mut(marker).data = CoreData::StackLabel(stack_label);

        let subject_result = self.lower_identifier(parent, subject)?;
        let subject_size = subject_result.expect_stack("match subject")?;

        let subject_type = self.type_of_identifier(subject)?;
        if !matches!(subject_type, Type::Sum(_)) {
            return Err(CompileError::Lower(
                "match subject must have a sum type".into(),
            ));
        }

        let after_label = self.new_label();

        for &branch in &children[1..] {
            if self.ast.get(branch).kind != NodeKind::MatchBranch {
                return Err(CompileError::Lower("malformed match branch".into()));
            }
            let branch_children = self.ast.children(branch).to_vec();
            if branch_children.len() != 2 {
                return Err(CompileError::Lower("malformed match branch".into()));
            }
            let (pattern, body) = (branch_children[0], branch_children[1]);

            let (test, _) = self.pattern_test(pattern, stack_label, 0, &subject_type)?;

            match test {
                Some(test_root) => {
                    let branch_false = self.new_label();
                    self.core.link_child(parent, test_root);

                    let jz = self.core.create_node(CoreKind::Jz, parent);
                    self.core.get_mut(jz).data = CoreData::Label(branch_false);

                    self.lower_branch_body(parent, body)?;

                    let skip = self.core.create_node(CoreKind::Jmp, parent);
                    self.core.get_mut(skip).data = CoreData::Label(after_label);

                    let lbl = self.core.create_node(CoreKind::Label, parent);
                    self.core.get_mut(lbl).data = CoreData::Label(branch_false);
                }
                None => {
                    // Irrefutable pattern: the body always runs and later
                    // branches are unreachable.
                    self.lower_branch_body(parent, body)?;
                    let skip = self.core.create_node(CoreKind::Jmp, parent);
                    self.core.get_mut(skip).data = CoreData::Label(after_label);
                    break;
                }
            }
        }

        let after = self.core.create_node(CoreKind::Label, parent);
        self.core.get_mut(after).data = CoreData::Label(after_label);

        let dealloc = self.core.create_node(CoreKind::StackDealloc, parent);
        self.core.get_mut(dealloc).data = CoreData::Size(subject_size);

        Ok(Lowered::none())
    }

    /// Branch bodies run with the subject still on the stack, so they must
    /// be depth-neutral; a value left below the subject's deallocation would
    /// corrupt the frame.
    fn lower_branch_body(&mut self, parent: CoreId, body: NodeId) -> Result<(), CompileError> {
        let result = self.lower_node(parent, body)?;
        if result.bytes() != 0 {
            return Err(CompileError::Lower(
                "match branch bodies must not leave values on the stack".into(),
            ));
        }
        Ok(())
    }

    /// Build the comparison tree of one pattern against the subject bytes at
    /// `delta` from the stack label. Returns the (detached) boolean-producing
    /// root — `None` when the pattern matches unconditionally — and the byte
    /// width of the value the pattern covers.
    fn pattern_test(
        &mut self,
        pattern: NodeId,
        stack_label: u32,
        delta: i32,
        ty: &Type,
    ) -> Result<(Option<CoreId>, u32), CompileError> {
        match self.ast.get(pattern).kind {
            // Constructor pattern `Ctor(inner)`: compare the tag byte, then
            // test the payload right above it.
            NodeKind::FunctionCall => {
                let children = self.ast.children(pattern).to_vec();
                if children.len() != 2 {
                    return Err(CompileError::Lower("malformed constructor pattern".into()));
                }
                let ctor = children[0];
                if self.ast.get(ctor).kind != NodeKind::Identifier {
                    return Err(CompileError::Lower("malformed constructor pattern".into()));
                }
                let name = self.ast.ident(ctor).name.clone();
                let (tag, payload_type) = ty.sum_variant(&name).ok_or_else(|| {
                    CompileError::Lower(format!("{name} is not a constructor of the subject type"))
                })?;
                let payload_type = payload_type.clone();

                let eq = self.core.create_detached(CoreKind::Eq);
                let probe = self.core.create_node(CoreKind::Push, eq);
                self.core.get_mut(probe).data = CoreData::Size(1);
                let source = self.core.create_node(CoreKind::RelativeOffset, probe);
                self.core.get_mut(source).data = CoreData::RelativeOffset {
                    stack_label,
                    delta,
                };
                let expected = self.core.create_node(CoreKind::Number, eq);
                self.core.get_mut(expected).data = CoreData::Number {
                    value: i64::from(tag),
                    kind: crate::types::NumberKind::U8,
                };

                let (inner, _) =
                    self.pattern_test(children[1], stack_label, delta + 1, &payload_type)?;

                let root = match inner {
                    Some(inner_root) => {
                        let and = self.core.create_detached(CoreKind::And);
                        self.core.link_child(and, eq);
                        self.core.link_child(and, inner_root);
                        and
                    }
                    None => eq,
                };
                Ok((Some(root), ty.byte_size()))
            }

            // A bare name matches anything and binds to the subject bytes.
            NodeKind::Identifier => {
                let size = self.type_size_of_identifier(pattern)?;
                self.ast.ident_mut(pattern).pattern_location = Some((stack_label, delta));
                Ok((None, size))
            }

            // Tuple pattern: fields at increasing offsets, tests AND-joined.
            NodeKind::Tuple => {
                let Type::Product(fields) = ty else {
                    return Err(CompileError::Lower(
                        "tuple pattern against a non-product value".into(),
                    ));
                };
                let fields = fields.clone();
                let children = self.ast.children(pattern).to_vec();
                if children.len() != fields.len() {
                    return Err(CompileError::Lower(format!(
                        "tuple pattern with {} elements against {} fields",
                        children.len(),
                        fields.len()
                    )));
                }

                let mut root: Option<CoreId> = None;
                let mut advance = 0u32;
                for (child, field_ty) in children.into_iter().zip(fields.iter()) {
                    let (test, size) =
                        self.pattern_test(child, stack_label, delta + advance as i32, field_ty)?;
                    advance += size;
                    if let Some(test_root) = test {
                        root = Some(match root {
                            None => test_root,
                            Some(existing) => {
                                let and = self.core.create_detached(CoreKind::And);
                                self.core.link_child(and, existing);
                                self.core.link_child(and, test_root);
                                and
                            }
                        });
                    }
                }
                Ok((root, advance))
            }

            // Literal patterns compare the subject bytes directly.
            NodeKind::Number => {
                let literal = self.ast.number(pattern);
                let size = literal.kind.byte_size();

                let eq = self.core.create_detached(CoreKind::Eq);
                let probe = self.core.create_node(CoreKind::Push, eq);
                self.core.get_mut(probe).data = CoreData::Size(size);
                let source = self.core.create_node(CoreKind::RelativeOffset, probe);
                self.core.get_mut(source).data = CoreData::RelativeOffset {
                    stack_label,
                    delta,
                };
                let expected = self.core.create_node(CoreKind::Number, eq);
                self.core.get_mut(expected).data = CoreData::Number {
                    value: literal.value,
                    kind: literal.kind,
                };
                Ok((Some(eq), size))
            }

            NodeKind::Boolean => {
                let value = self.ast.boolean(pattern);

                let eq = self.core.create_detached(CoreKind::Eq);
                let probe = self.core.create_node(CoreKind::Push, eq);
                self.core.get_mut(probe).data = CoreData::Size(1);
                let source = self.core.create_node(CoreKind::RelativeOffset, probe);
                self.core.get_mut(source).data = CoreData::RelativeOffset {
                    stack_label,
                    delta,
                };
                let expected = self.core.create_node(CoreKind::Boolean, eq);
                self.core.get_mut(expected).data = CoreData::Boolean(value);
                Ok((Some(eq), 1))
            }

            other => Err(CompileError::Lower(format!("invalid pattern {other:?}"))),
        }
    }
}
