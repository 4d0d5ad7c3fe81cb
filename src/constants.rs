//! Classification of imported constants into inline and file-backed values.

use std::collections::BTreeMap;
use std::sync::Arc;

use rankc_tensor::TensorValue;

/// Largest number of elements a constant may have and still be emitted as a
/// literal function.
pub const SMALL_CONSTANT_MAX_ELEMENTS: usize = 1;

/// How an imported constant is made available to ranking expressions.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConstantClass {
    /// Emitted as a generated function whose body is a tensor literal.
    Inline,

    /// Written to a file and registered as a ranking constant.
    FileBacked,
}

/// Decide how `value` is emitted.
pub fn classify(value: &TensorValue) -> ConstantClass {
    if value.len() <= SMALL_CONSTANT_MAX_ELEMENTS {
        ConstantClass::Inline
    } else {
        ConstantClass::FileBacked
    }
}

/// Constants of a conversion, split by [`classify`].
#[derive(Debug, Default)]
pub struct ClassifiedConstants {
    pub inline: BTreeMap<String, Arc<TensorValue>>,
    pub file_backed: BTreeMap<String, Arc<TensorValue>>,
}

/// Split `constants` into inline and file-backed values.
pub fn partition(constants: BTreeMap<String, Arc<TensorValue>>) -> ClassifiedConstants {
    let mut classified = ClassifiedConstants::default();
    for (name, value) in constants {
        match classify(&value) {
            ConstantClass::Inline => classified.inline.insert(name, value),
            ConstantClass::FileBacked => classified.file_backed.insert(name, value),
        };
    }
    classified
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use rankc_tensor::{TensorValue, ValueType};
    use rankc_testing::TestCases;

    use super::{classify, partition, ConstantClass};

    #[test]
    fn test_classify() {
        #[derive(Debug)]
        struct Case {
            shape: &'static [usize],
            expected: ConstantClass,
        }

        let cases = [
            Case {
                shape: &[],
                expected: ConstantClass::Inline,
            },
            Case {
                shape: &[1],
                expected: ConstantClass::Inline,
            },
            Case {
                shape: &[1, 1],
                expected: ConstantClass::Inline,
            },
            Case {
                shape: &[2],
                expected: ConstantClass::FileBacked,
            },
            Case {
                shape: &[784, 10],
                expected: ConstantClass::FileBacked,
            },
        ];

        cases.test_each(|case| {
            let len = case.shape.iter().product();
            let value =
                TensorValue::from_positional(ValueType::Float, case.shape, vec![0.5; len]).unwrap();
            assert_eq!(classify(&value), case.expected);
        })
    }

    #[test]
    fn test_partition() {
        let mut constants = BTreeMap::new();
        constants.insert(
            "epsilon".to_string(),
            Arc::new(TensorValue::scalar(ValueType::Float, 1e-5)),
        );
        constants.insert(
            "weights".to_string(),
            Arc::new(
                TensorValue::from_positional(ValueType::Float, &[2], vec![1.0, 2.0]).unwrap(),
            ),
        );

        let classified = partition(constants);
        assert_eq!(
            classified.inline.keys().collect::<Vec<_>>(),
            ["epsilon"]
        );
        assert_eq!(
            classified.file_backed.keys().collect::<Vec<_>>(),
            ["weights"]
        );
    }
}
