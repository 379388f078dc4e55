//! Command signature (§4.8): an immutable descriptor of `ExecuteIndirect`'s
//! argument layout.

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndirectArgumentType {
    Draw,
    DrawIndexed,
    Dispatch,
    VertexBufferView { slot: u32 },
    IndexBufferView,
    Constant { root_parameter_index: u32, dest_offset_words: u32, count: u32 },
    ConstantBufferView { root_parameter_index: u32 },
    ShaderResourceView { root_parameter_index: u32 },
    UnorderedAccessView { root_parameter_index: u32 },
}

impl IndirectArgumentType {
    fn is_terminal(&self) -> bool {
        matches!(
            self,
            IndirectArgumentType::Draw
                | IndirectArgumentType::DrawIndexed
                | IndirectArgumentType::Dispatch
        )
    }
}

/// Immutable after creation; the struct describing the argument sequence is
/// cloned into heap-owned storage so the caller's buffer need not outlive
/// the call.
#[derive(Debug)]
pub struct CommandSignature {
    arguments: Box<[IndirectArgumentType]>,
    byte_stride: u32,
}

impl CommandSignature {
    /// A `DRAW`/`DRAW_INDEXED`/`DISPATCH` argument, if present, must be the
    /// last entry; otherwise construction fails with `InvalidArg` (§4.8).
    pub fn new(arguments: &[IndirectArgumentType], byte_stride: u32) -> Result<Self> {
        for (i, arg) in arguments.iter().enumerate() {
            if arg.is_terminal() && i != arguments.len() - 1 {
                log::error!(
                    "command signature argument {} ({:?}) is a terminal draw/dispatch \
                     argument but is not last",
                    i,
                    arg
                );
                return Err(Error::InvalidArg);
            }
        }

        Ok(CommandSignature {
            arguments: arguments.to_vec().into_boxed_slice(),
            byte_stride,
        })
    }

    pub fn arguments(&self) -> &[IndirectArgumentType] {
        &self.arguments
    }

    pub fn byte_stride(&self) -> u32 {
        self.byte_stride
    }

    pub fn terminal_argument(&self) -> Option<IndirectArgumentType> {
        self.arguments.last().copied().filter(|a| a.is_terminal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_draw_must_be_last() {
        // [CBV_VIEW, DRAW, CBV_VIEW] -> InvalidArg, per the spec's concrete scenario.
        let args = [
            IndirectArgumentType::ConstantBufferView {
                root_parameter_index: 0,
            },
            IndirectArgumentType::Draw,
            IndirectArgumentType::ConstantBufferView {
                root_parameter_index: 1,
            },
        ];
        assert_eq!(CommandSignature::new(&args, 32).unwrap_err(), Error::InvalidArg);
    }

    #[test]
    fn terminal_draw_last_is_accepted() {
        let args = [
            IndirectArgumentType::ConstantBufferView {
                root_parameter_index: 0,
            },
            IndirectArgumentType::DrawIndexed,
        ];
        let sig = CommandSignature::new(&args, 24).unwrap();
        assert_eq!(sig.terminal_argument(), Some(IndirectArgumentType::DrawIndexed));
    }

    #[test]
    fn no_terminal_argument_is_allowed() {
        let args = [IndirectArgumentType::VertexBufferView { slot: 0 }];
        let sig = CommandSignature::new(&args, 16).unwrap();
        assert_eq!(sig.terminal_argument(), None);
    }
}
