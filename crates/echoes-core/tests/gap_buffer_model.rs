use echoes_core::buffer::{BufferError, GapBuffer};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Push(u8),
    Insert(usize, u8),
    InsertRange(usize, Vec<u8>),
    Remove(usize, usize),
    Set(usize, u8),
    Pop,
    Clear,
    /// An insert one past the end, which must be rejected.
    InsertOutOfBounds(u8),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => any::<u8>().prop_map(Op::Push),
        6 => (any::<usize>(), any::<u8>()).prop_map(|(at, v)| Op::Insert(at, v)),
        3 => (any::<usize>(), prop::collection::vec(any::<u8>(), 0..12))
            .prop_map(|(at, vs)| Op::InsertRange(at, vs)),
        5 => (any::<usize>(), 0usize..6).prop_map(|(at, n)| Op::Remove(at, n)),
        2 => (any::<usize>(), any::<u8>()).prop_map(|(at, v)| Op::Set(at, v)),
        2 => Just(Op::Pop),
        1 => Just(Op::Clear),
        1 => any::<u8>().prop_map(Op::InsertOutOfBounds),
    ]
}

fn apply(buffer: &mut GapBuffer<u8>, model: &mut Vec<u8>, op: Op) -> Result<(), TestCaseError> {
    match op {
        Op::Push(v) => {
            buffer.push(v);
            model.push(v);
        }
        Op::Insert(at, v) => {
            let at = at % (model.len() + 1);
            buffer.insert(at, v).map_err(|e| TestCaseError::fail(e.to_string()))?;
            model.insert(at, v);
        }
        Op::InsertRange(at, values) => {
            let at = at % (model.len() + 1);
            buffer
                .insert_range(at, &values, 0, values.len())
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            model.splice(at..at, values);
        }
        Op::Remove(at, count) => {
            let at = at % (model.len() + 1);
            let count = count.min(model.len() - at);
            buffer.remove(at, count).map_err(|e| TestCaseError::fail(e.to_string()))?;
            model.drain(at..at + count);
        }
        Op::Set(at, v) => {
            if model.is_empty() {
                prop_assert!(buffer.set(0, v).is_err());
            } else {
                let at = at % model.len();
                buffer.set(at, v).map_err(|e| TestCaseError::fail(e.to_string()))?;
                model[at] = v;
            }
        }
        Op::Pop => prop_assert_eq!(buffer.pop(), model.pop()),
        Op::Clear => {
            buffer.clear();
            model.clear();
        }
        Op::InsertOutOfBounds(v) => {
            let len = model.len();
            prop_assert_eq!(
                buffer.insert(len + 1, v),
                Err(BufferError::OutOfBounds {
                    offset: len + 1,
                    count: 0,
                    len,
                })
            );
        }
    }
    Ok(())
}

proptest! {
    #![proptest_config(proptest::test_runner::Config::with_cases(2000))]

    #[test]
    fn gap_buffer_matches_vec_after_every_op(ops in prop::collection::vec(arb_op(), 0..80)) {
        let mut buffer = GapBuffer::new();
        let mut model = Vec::new();
        for op in ops {
            apply(&mut buffer, &mut model, op)?;
            prop_assert_eq!(buffer.len(), model.len());
            prop_assert_eq!(buffer.to_vec(), model.clone());
        }
        let collected: Vec<u8> = buffer.iter().collect();
        prop_assert_eq!(&collected, &model);
        let reversed: Vec<u8> = buffer.iter().rev().collect();
        let mut expected = model.clone();
        expected.reverse();
        prop_assert_eq!(reversed, expected);
    }

    #[test]
    fn slices_cover_exactly_the_requested_range(
        values in prop::collection::vec(any::<u8>(), 1..60),
        gap_at in any::<usize>(),
        a in any::<usize>(),
        b in any::<usize>(),
    ) {
        let mut buffer = GapBuffer::from_slice(&values);
        // Move the gap somewhere inside.
        let gap_at = gap_at % (values.len() + 1);
        buffer.insert(gap_at, 0).unwrap();
        buffer.remove(gap_at, 1).unwrap();

        let (start, end) = {
            let a = a % (values.len() + 1);
            let b = b % (values.len() + 1);
            (a.min(b), a.max(b))
        };
        let (head, tail) = buffer.slices(start, end).unwrap();
        let mut joined = head.to_vec();
        joined.extend_from_slice(tail);
        prop_assert_eq!(&joined[..], &values[start..end]);
    }

    #[test]
    fn cursor_walk_visits_every_element(values in prop::collection::vec(any::<u8>(), 0..40)) {
        let buffer = GapBuffer::from_slice(&values);
        let mut cursor = buffer.cursor_at_start();
        let mut forward = Vec::new();
        while buffer.has_next(&cursor).unwrap() {
            forward.push(buffer.move_next(&mut cursor).unwrap());
        }
        prop_assert_eq!(&forward, &values);

        let mut backward = Vec::new();
        while buffer.has_previous(&cursor).unwrap() {
            backward.push(buffer.move_previous(&mut cursor).unwrap());
        }
        backward.reverse();
        prop_assert_eq!(backward, values);
    }
}

#[test]
fn stale_cursor_fails_fast() {
    let mut buffer = GapBuffer::from_slice(&[1u8, 2, 3]);
    let cursor = buffer.cursor(1).unwrap();
    buffer.push(4);
    assert_eq!(buffer.current(&cursor), Err(BufferError::ConcurrentModification));
}
