use std::{
    cell::RefCell,
    io::Write,
    net::{TcpListener, TcpStream},
    rc::Rc,
    thread,
    time::Duration,
};

use coflow::{AdapterConfig, AsyncDataSource, Error, Promise, Scheduler, StreamAdapter, Yielded};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let address = listener.local_addr()?;

    // A peer that sends a message in pieces, then hangs up.
    let peer = thread::spawn(move || -> std::io::Result<()> {
        let (mut socket, _) = listener.accept()?;
        for chunk in ["hello ", "from ", "the other ", "side"] {
            socket.write_all(chunk.as_bytes())?;
            thread::sleep(Duration::from_millis(20));
        }
        Ok(())
    });

    let scheduler = Scheduler::new();
    let adapter = StreamAdapter::tcp(&scheduler, TcpStream::connect(address)?)?
        .with_config(AdapterConfig::new().throw_on_disconnect(false));
    let buffer = Rc::new(RefCell::new(vec![0; 64]));

    let mut received = Vec::new();
    let mut pending: Option<Promise<usize>> = None;
    let reader = adapter.clone();
    let task = std::iter::from_fn(move || -> Option<Result<Yielded<String>, Error>> {
        if let Some(read) = pending.take() {
            match read.result()? {
                Ok(0) => {
                    let text = String::from_utf8_lossy(&received).into_owned();
                    return Some(Ok(Yielded::Result(text)));
                }
                Ok(count) => {
                    println!("Read {count} bytes");
                    received.extend_from_slice(&buffer.borrow()[..count]);
                }
                Err(error) => return Some(Err(error)),
            }
        }
        let read = reader.read(&buffer, 0, 64);
        let next = Yielded::wait(&read);
        pending = Some(read);
        Some(Ok(next))
    });

    let message = scheduler.spawn(task);
    while !message.is_settled() {
        scheduler.tick();
        // Reads are retried every tick, so don't spin the CPU.
        thread::sleep(Duration::from_millis(1));
    }

    println!("Received: {:?}", message.result().unwrap()?);
    println!("End of stream: {}", adapter.is_end_of_stream());
    adapter.dispose();

    peer.join().expect("peer thread panicked")?;
    Ok(())
}
