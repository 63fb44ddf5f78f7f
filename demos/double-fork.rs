use std::hint::black_box;
use std::thread::sleep;
use std::time::Duration;

use nix::sys::wait::waitpid;
use nix::unistd::{fork, getpid, ForkResult, Pid};

fn print(depth: usize, msg: impl AsRef<str>) {
    let pad = "  ".repeat(depth);
    let pid = getpid().as_raw();
    let msg = msg.as_ref();
    println!("\x1b[0;31m{pad}[{pid}]: {msg}\x1b[0m")
}

/// Forks once; the child runs `then` and exits, the parent gets its pid back.
fn spawn(depth: usize, then: impl FnOnce(usize)) -> Pid {
    match unsafe { fork() } {
        Ok(ForkResult::Child) => {
            print(depth + 1, "child");
            then(depth + 1);
            let vec = vec![1u8; 2 * 1024 * 1024];
            sleep(Duration::from_millis(20));
            black_box(&vec);
            std::process::exit(0);
        }
        Ok(ForkResult::Parent { child }) => {
            print(depth, format!("parent of {}", child));
            child
        }
        Err(e) => panic!("{}", e),
    }
}

fn main() {
    // root -> a -> b, and root -> c: three processes
    let a = spawn(0, |depth| {
        let b = spawn(depth, |_| {});
        waitpid(b, None).expect("failed waiting for grandchild");
    });
    let c = spawn(0, |_| {});

    for child in [a, c] {
        waitpid(child, None).expect("failed waiting for child");
    }
}
