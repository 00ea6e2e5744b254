use super::{Full, SocketBuffer};

#[test]
fn write_and_read() {
    let mut buffer = SocketBuffer::new(8);
    assert_eq!(buffer.write(b"hello"), 5);
    assert_eq!(buffer.len(), 5);
    assert_eq!(buffer.window(), 3);

    let mut out = [0; 8];
    assert_eq!(buffer.read(&mut out), 5);
    assert_eq!(&out[..5], b"hello");
    assert!(buffer.is_empty());
}

#[test]
fn partial_write_truncates() {
    let mut buffer = SocketBuffer::new(4);
    assert_eq!(buffer.write(b"abcdef"), 4);
    assert!(buffer.is_full());
    assert_eq!(buffer.write(b"g"), 0);
    assert_eq!(buffer.len(), 4);
}

#[test]
fn try_write_is_all_or_nothing() {
    let mut buffer = SocketBuffer::new(4);
    buffer.try_write(b"abc").unwrap();
    assert_eq!(buffer.try_write(b"de"), Err(Full { available: 1 }));
    assert_eq!(buffer.segments().to_vec(), b"abc");

    buffer.try_write(b"d").unwrap();
    assert_eq!(buffer.try_write(b"e"), Err(Full { available: 0 }));
    assert_eq!(buffer.segments().to_vec(), b"abcd");
}

#[test]
fn wrapping_segments() {
    let mut buffer = SocketBuffer::new(8);
    buffer.write(b"012345");
    assert_eq!(buffer.consume(4), 4);
    buffer.write(b"6789ab");

    let segments = buffer.segments();
    assert_eq!(segments.count(), 2);
    assert_eq!(segments.total(), 8);
    assert_eq!(segments.to_vec(), b"456789ab");

    let head = segments.truncate(5);
    assert_eq!(head.to_vec(), b"45678");
}

#[test]
fn unfilled_regions_cover_window() {
    let mut buffer = SocketBuffer::new(8);
    buffer.write(b"0123456");
    buffer.consume(5);

    let (first, second) = buffer.unfilled_mut();
    assert_eq!(first.len() + second.len(), 6);
    first.copy_from_slice(b"7");
    second[..2].copy_from_slice(b"89");
    assert_eq!(buffer.commit(3), 3);
    assert_eq!(buffer.segments().to_vec(), b"56789");
}

#[test]
fn consume_clamps() {
    let mut buffer = SocketBuffer::new(4);
    buffer.write(b"ab");
    assert_eq!(buffer.consume(10), 2);
    assert_eq!(buffer.len(), 0);
    assert_eq!(buffer.commit(10), 4);
    assert_eq!(buffer.len(), 4);
}

/// Drive the ring with a deterministic pseudo-random mix of operations and check the length stays
/// within bounds and the contents match a simple model.
#[test]
fn bounded_under_arbitrary_sequences() {
    let mut buffer = SocketBuffer::new(13);
    let mut model = std::collections::VecDeque::new();
    let mut state = 0x2545_f491u32;
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        state
    };

    for round in 0..2000 {
        let amount = (next() % 9) as usize;
        if next() % 2 == 0 {
            let data: Vec<u8> = (0..amount).map(|i| (round + i) as u8).collect();
            let taken = buffer.write(&data);
            model.extend(&data[..taken]);
        } else {
            let mut out = vec![0; amount];
            let read = buffer.read(&mut out);
            let expected: Vec<u8> = model.drain(..read).collect();
            assert_eq!(&out[..read], &expected[..]);
        }

        assert!(buffer.len() <= buffer.capacity());
        assert_eq!(buffer.len(), model.len());
    }
}

#[test]
fn zero_capacity() {
    let mut buffer = SocketBuffer::new(0);
    assert_eq!(buffer.write(b"x"), 0);
    assert_eq!(buffer.try_write(b""), Ok(()));
    assert_eq!(buffer.segments().count(), 0);
    let (first, second) = buffer.unfilled_mut();
    assert!(first.is_empty() && second.is_empty());
}
