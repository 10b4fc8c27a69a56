use crate::error::{MismatchReason, StructuralMismatch};

/// Pairs `old[i]` with `new[i]`, refusing to pair anything if the lengths
/// differ or if any position disagrees on identity.
///
/// `mismatch` builds the reason for the first position whose identities differ.
pub fn pair_by_position<'a, T, K, I, M>(
    old: &'a [T],
    new: &'a [T],
    identity: I,
    mismatch: M,
) -> Result<Vec<(&'a T, &'a T)>, StructuralMismatch>
where
    K: PartialEq,
    I: Fn(&T) -> K,
    M: Fn(&T, &T) -> MismatchReason,
{
    if old.len() != new.len() {
        return Err(StructuralMismatch {
            position: old.len().min(new.len()),
            reason: MismatchReason::LengthDiffers {
                old: old.len(),
                new: new.len(),
            },
        });
    }

    old.iter()
        .zip(new)
        .enumerate()
        .map(|(position, (before, after))| {
            if identity(before) == identity(after) {
                Ok((before, after))
            } else {
                Err(StructuralMismatch {
                    position,
                    reason: mismatch(before, after),
                })
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reason(old: &u64, new: &u64) -> MismatchReason {
        MismatchReason::ThreadIdDiffers { old: *old, new: *new }
    }

    #[test]
    fn pairs_equal_sequences() {
        let pairs = pair_by_position(&[1u64, 2], &[1, 2], |id| *id, reason).unwrap();
        assert_eq!(pairs, vec![(&1, &1), (&2, &2)]);
    }

    #[test]
    fn reports_first_identity_mismatch() {
        let err = pair_by_position(&[1u64, 2, 3], &[1, 5, 6], |id| *id, reason).unwrap_err();
        assert_eq!(err.position, 1);
        assert_eq!(err.reason, MismatchReason::ThreadIdDiffers { old: 2, new: 5 });
    }

    #[test]
    fn length_difference_is_a_mismatch_not_a_truncation() {
        let err = pair_by_position(&[1u64, 2], &[1, 2, 3], |id| *id, reason).unwrap_err();
        assert!(err.is_length_mismatch());
        assert_eq!(err.reason, MismatchReason::LengthDiffers { old: 2, new: 3 });
    }

    #[test]
    fn empty_sequences_pair_trivially() {
        let pairs = pair_by_position::<u64, _, _, _>(&[], &[], |id| *id, reason).unwrap();
        assert!(pairs.is_empty());
    }
}
