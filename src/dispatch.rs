//! Inbound frame dispatch.
//!
//! [`FrameReader`] turns the byte stream of one connection into
//! discrete [`Frame`]s and routes them onward: request frames go one at
//! a time, in arrival order, to a [`RequestScheduler`]; response frames
//! completing within a single read event are linked into a chain and
//! handed to the [`ResponseHandler`] in one call after the event's
//! bytes are drained, batching wake-ups instead of paying one per
//! frame.
//!
//! Correlating a response back to its outstanding request happens
//! behind the [`ResponseHandler`]; the key lives inside the frame body
//! and is not this layer's concern. The only assumption made about a
//! scheduled frame's fate is that its pool eventually reclaims it.

use bytes::BytesMut;

use crate::error::Result;
use crate::net::reader::AsyncReader;
use crate::net::socket::AsyncSocket;
use crate::protocol::wire_format::{FrameHeader, DEFAULT_MAX_FRAME_SIZE, HEADER_SIZE};
use crate::protocol::{Frame, FrameAllocator};
use crate::CorewireError;

/// Sink for completed request frames.
pub trait RequestScheduler: Send {
    fn schedule(&mut self, frame: Frame);
}

impl<F> RequestScheduler for F
where
    F: FnMut(Frame) + Send,
{
    fn schedule(&mut self, frame: Frame) {
        self(frame)
    }
}

/// Sink for completed response frames, delivered as an arrival-ordered
/// chain (see [`Frame::take_next`]).
pub trait ResponseHandler: Send {
    fn accept(&mut self, chain: Frame);
}

impl<F> ResponseHandler for F
where
    F: FnMut(Frame) + Send,
{
    fn accept(&mut self, chain: Frame) {
        self(chain)
    }
}

/// Reconstructs frames from a connection's byte stream and dispatches
/// them.
///
/// Tolerates the header and body arriving split across any number of
/// read events, and multiple frames arriving in one event. Request and
/// response frames draw their buffers from distinct pools.
pub struct FrameReader {
    request_pool: FrameAllocator,
    response_pool: FrameAllocator,
    scheduler: Box<dyn RequestScheduler>,
    responses: Box<dyn ResponseHandler>,
    inbound: Option<Frame>,
    max_frame_size: usize,
}

impl FrameReader {
    pub fn new(
        request_pool: FrameAllocator,
        response_pool: FrameAllocator,
        scheduler: impl RequestScheduler + 'static,
        responses: impl ResponseHandler + 'static,
    ) -> Self {
        Self {
            request_pool,
            response_pool,
            scheduler: Box::new(scheduler),
            responses: Box::new(responses),
            inbound: None,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Cap the accepted frame size; larger headers abort the
    /// connection.
    pub fn with_max_frame_size(mut self, max: usize) -> Self {
        self.max_frame_size = max;
        self
    }
}

impl AsyncReader for FrameReader {
    fn on_read(&mut self, recv: &mut BytesMut, socket: &AsyncSocket) -> Result<()> {
        let mut completed_responses: Vec<Frame> = Vec::new();

        loop {
            if self.inbound.is_none() {
                let header = match FrameHeader::decode(&recv[..]) {
                    None => break, // need more header bytes
                    Some(header) => header?,
                };
                if header.size > self.max_frame_size {
                    return Err(CorewireError::Protocol(format!(
                        "Frame size {} exceeds maximum {}",
                        header.size, self.max_frame_size
                    )));
                }
                let pool = if header.is_response() {
                    &self.response_pool
                } else {
                    &self.request_pool
                };
                let mut frame = pool.allocate(header.size, header.flags)?;
                let _ = recv.split_to(HEADER_SIZE);
                frame.bind_socket(socket.clone());
                self.inbound = Some(frame);
            }
            let Some(frame) = self.inbound.as_mut() else {
                break;
            };

            frame.fill_from(recv);
            if !frame.is_complete() {
                break; // continued on the next read event
            }

            if let Some(frame) = self.inbound.take() {
                socket.metrics().inc_frames_read();
                if frame.is_response() {
                    completed_responses.push(frame);
                } else {
                    self.scheduler.schedule(frame);
                }
            }
        }

        if !completed_responses.is_empty() {
            // Link into a chain preserving arrival order, one hand-off
            // for the whole read event.
            let mut chain: Option<Frame> = None;
            for mut frame in completed_responses.into_iter().rev() {
                frame.set_next(chain.take());
                chain = Some(frame);
            }
            if let Some(chain) = chain {
                self.responses.accept(chain);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use crate::net::reader::DevNullReader;
    use crate::protocol::wire_format::FLAG_OP_RESPONSE;
    use crate::protocol::PoolRole;
    use crate::reactor::Reactor;

    struct Sinks {
        requests: Arc<Mutex<Vec<Frame>>>,
        responses: Arc<Mutex<Vec<Frame>>>,
    }

    fn new_reader() -> (FrameReader, Sinks, FrameAllocator, FrameAllocator) {
        let requests: Arc<Mutex<Vec<Frame>>> = Arc::new(Mutex::new(Vec::new()));
        let responses: Arc<Mutex<Vec<Frame>>> = Arc::new(Mutex::new(Vec::new()));
        let request_pool = FrameAllocator::new(PoolRole::Request);
        let response_pool = FrameAllocator::new(PoolRole::RemoteResponse);

        let req_sink = requests.clone();
        let resp_sink = responses.clone();
        let reader = FrameReader::new(
            request_pool.clone(),
            response_pool.clone(),
            move |frame: Frame| req_sink.lock().unwrap().push(frame),
            move |chain: Frame| resp_sink.lock().unwrap().push(chain),
        );
        (
            reader,
            Sinks {
                requests,
                responses,
            },
            request_pool,
            response_pool,
        )
    }

    fn test_socket() -> (Reactor, AsyncSocket) {
        let reactor = Reactor::builder().name("test").build().unwrap();
        let socket = reactor
            .socket_builder()
            .unwrap()
            .reader(DevNullReader::new())
            .build()
            .unwrap();
        (reactor, socket)
    }

    fn wire(flags: u32, body: &[u8]) -> Vec<u8> {
        Frame::with_flags(flags, body).wire_bytes().to_vec()
    }

    #[test]
    fn test_single_request_is_scheduled_once() {
        let (mut reader, sinks, _rq, _rp) = new_reader();
        let (_reactor, socket) = test_socket();

        let mut recv = BytesMut::from(&wire(0, b"hello")[..]);
        reader.on_read(&mut recv, &socket).unwrap();

        let requests = sinks.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].body(), b"hello");
        assert!(requests[0].socket().is_some());
        assert!(sinks.responses.lock().unwrap().is_empty());
        assert!(recv.is_empty());
    }

    #[test]
    fn test_three_responses_arrive_as_one_chain_in_order() {
        let (mut reader, sinks, _rq, _rp) = new_reader();
        let (_reactor, socket) = test_socket();

        let mut bytes = Vec::new();
        bytes.extend(wire(FLAG_OP_RESPONSE, b"first"));
        bytes.extend(wire(FLAG_OP_RESPONSE, b"second"));
        bytes.extend(wire(FLAG_OP_RESPONSE, b"third"));
        let mut recv = BytesMut::from(&bytes[..]);

        reader.on_read(&mut recv, &socket).unwrap();

        // Exactly one hand-off with a 3-element chain, arrival order.
        let mut responses = sinks.responses.lock().unwrap();
        assert_eq!(responses.len(), 1);
        let mut chain = responses.pop().unwrap();
        assert_eq!(chain.chain_len(), 3);
        assert_eq!(chain.body(), b"first");
        let mut second = chain.take_next().unwrap();
        assert_eq!(second.body(), b"second");
        let third = second.take_next().unwrap();
        assert_eq!(third.body(), b"third");
    }

    #[test]
    fn test_mixed_requests_and_responses() {
        let (mut reader, sinks, _rq, _rp) = new_reader();
        let (_reactor, socket) = test_socket();

        let mut bytes = Vec::new();
        bytes.extend(wire(0, b"req-1"));
        bytes.extend(wire(FLAG_OP_RESPONSE, b"resp-1"));
        bytes.extend(wire(0, b"req-2"));
        bytes.extend(wire(FLAG_OP_RESPONSE, b"resp-2"));
        let mut recv = BytesMut::from(&bytes[..]);

        reader.on_read(&mut recv, &socket).unwrap();

        let requests = sinks.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].body(), b"req-1");
        assert_eq!(requests[1].body(), b"req-2");

        let responses = sinks.responses.lock().unwrap();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].chain_len(), 2);
        assert_eq!(responses[0].body(), b"resp-1");
    }

    #[test]
    fn test_reconstruction_is_chunking_invariant() {
        let body = b"chunk independence";
        let serialized = wire(FLAG_OP_RESPONSE, body);

        for chunk_size in [1usize, 3, serialized.len()] {
            let (mut reader, sinks, _rq, _rp) = new_reader();
            let (_reactor, socket) = test_socket();

            let mut recv = BytesMut::new();
            for chunk in serialized.chunks(chunk_size) {
                recv.extend_from_slice(chunk);
                reader.on_read(&mut recv, &socket).unwrap();
            }

            let responses = sinks.responses.lock().unwrap();
            assert_eq!(responses.len(), 1, "chunk size {}", chunk_size);
            let frame = &responses[0];
            assert_eq!(frame.size(), serialized.len());
            assert_eq!(frame.flags(), FLAG_OP_RESPONSE);
            assert_eq!(frame.body(), body);
        }
    }

    #[test]
    fn test_partial_header_consumes_nothing() {
        let (mut reader, sinks, _rq, _rp) = new_reader();
        let (_reactor, socket) = test_socket();

        let serialized = wire(0, b"payload");
        let mut recv = BytesMut::from(&serialized[..HEADER_SIZE - 1]);

        reader.on_read(&mut recv, &socket).unwrap();

        // Fewer than 8 bytes available: nothing consumed, nothing built.
        assert_eq!(recv.len(), HEADER_SIZE - 1);
        assert!(sinks.requests.lock().unwrap().is_empty());
    }

    #[test]
    fn test_zero_length_body_is_valid() {
        let (mut reader, sinks, _rq, _rp) = new_reader();
        let (_reactor, socket) = test_socket();

        let mut recv = BytesMut::from(&wire(0, b"")[..]);
        reader.on_read(&mut recv, &socket).unwrap();

        let requests = sinks.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].size(), HEADER_SIZE);
        assert!(requests[0].body().is_empty());
    }

    #[test]
    fn test_undersized_frame_aborts() {
        let (mut reader, _sinks, _rq, _rp) = new_reader();
        let (_reactor, socket) = test_socket();

        let mut recv = BytesMut::new();
        recv.extend_from_slice(&4i32.to_be_bytes());
        recv.extend_from_slice(&0u32.to_be_bytes());

        let result = reader.on_read(&mut recv, &socket);
        assert!(matches!(result, Err(CorewireError::Protocol(_))));
    }

    #[test]
    fn test_oversized_frame_aborts() {
        let (reader, _sinks, _rq, _rp) = new_reader();
        let mut reader = reader.with_max_frame_size(64);
        let (_reactor, socket) = test_socket();

        let mut recv = BytesMut::new();
        recv.extend_from_slice(&1000i32.to_be_bytes());
        recv.extend_from_slice(&0u32.to_be_bytes());

        let result = reader.on_read(&mut recv, &socket);
        assert!(matches!(result, Err(CorewireError::Protocol(_))));
    }

    #[test]
    fn test_pools_are_partitioned_by_role() {
        let (mut reader, sinks, request_pool, response_pool) = new_reader();
        let (_reactor, socket) = test_socket();

        let mut bytes = Vec::new();
        bytes.extend(wire(0, b"request"));
        bytes.extend(wire(FLAG_OP_RESPONSE, b"response"));
        let mut recv = BytesMut::from(&bytes[..]);

        reader.on_read(&mut recv, &socket).unwrap();

        assert_eq!(request_pool.outstanding(), 1);
        assert_eq!(response_pool.outstanding(), 1);

        sinks.requests.lock().unwrap().clear();
        sinks.responses.lock().unwrap().clear();
        assert_eq!(request_pool.outstanding(), 0);
        assert_eq!(response_pool.outstanding(), 0);
    }

    #[test]
    fn test_dropping_reader_reclaims_partial_frame() {
        let (mut reader, _sinks, request_pool, _rp) = new_reader();
        let (_reactor, socket) = test_socket();

        // Header promises 100 bytes; only the header arrives.
        let mut recv = BytesMut::new();
        recv.extend_from_slice(&100i32.to_be_bytes());
        recv.extend_from_slice(&0u32.to_be_bytes());
        reader.on_read(&mut recv, &socket).unwrap();
        assert_eq!(request_pool.outstanding(), 1);

        drop(reader);
        assert_eq!(request_pool.outstanding(), 0);
    }
}
