use crate::error::InputError;

/// Sums a party's set, failing if the total does not fit in `bits` bits.
pub fn set_sum(set: &[u64], bits: usize) -> Result<u64, InputError> {
    let sum = set
        .iter()
        .try_fold(0u64, |acc, &x| acc.checked_add(x))
        .ok_or(InputError::Overflow { bits })?;

    if bits < 64 && sum >> bits != 0 {
        return Err(InputError::Overflow { bits });
    }
    Ok(sum)
}

/// Little-endian encoding of `value` into exactly `bits` bits.
pub fn encode(value: u64, bits: usize) -> Vec<bool> {
    (0..bits)
        .map(|i| i < 64 && (value >> i) & 1 == 1)
        .collect()
}

/// Decodes little-endian bits. Bits above position 63 must be zero.
pub fn decode(bits: &[bool]) -> Result<u64, InputError> {
    if bits.iter().skip(64).any(|&bit| bit) {
        return Err(InputError::Overflow { bits: 64 });
    }
    Ok(bits
        .iter()
        .take(64)
        .enumerate()
        .fold(0, |acc, (i, &bit)| acc | ((bit as u64) << i)))
}

/// Encodes a party's set onto its input wires.
pub fn encode_set(set: &[u64], bits: usize) -> Result<Vec<bool>, InputError> {
    Ok(encode(set_sum(set, bits)?, bits))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_sum() {
        assert_eq!(set_sum(&[1, 2, 3], 8), Ok(6));
        assert_eq!(set_sum(&[], 8), Ok(0));
        assert_eq!(set_sum(&[200, 55], 8), Ok(255));
        assert_eq!(set_sum(&[200, 56], 8), Err(InputError::Overflow { bits: 8 }));
        assert_eq!(
            set_sum(&[u64::MAX, 1], 64),
            Err(InputError::Overflow { bits: 64 })
        );
    }

    #[test]
    fn test_encode_little_endian() {
        assert_eq!(encode(6, 4), vec![false, true, true, false]);
        assert_eq!(decode(&encode(6, 4)), Ok(6));
        let mut bits = vec![false; 9];
        bits[0] = true;
        bits[8] = true;
        assert_eq!(decode(&bits), Ok(257));
    }

    #[test]
    fn test_encode_set() {
        assert_eq!(encode_set(&[10], 8).unwrap().len(), 8);
        assert_eq!(encode_set(&[256], 8), Err(InputError::Overflow { bits: 8 }));
    }
}
