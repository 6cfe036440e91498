//! # htmlpacker デコーダーモジュール
//!
//! アプリケーションの圧縮済みペイロード（Brotli）を展開する。
//! ブートストラップはこのモジュールを先に初期化し、展開結果を
//! アプリケーションモジュールとして起動する。
//!
//! ## ターゲット
//! `wasm32-unknown-unknown`
//!
//! ## エクスポート
//! - `alloc(size) -> ptr`: ホストが入力を書き込む領域の確保
//! - `decompress(ptr, len) -> ptr`: 展開。結果は `[4B LE: len][bytes]`、失敗時は0

#![no_std]

extern crate alloc;

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;

use brotli_decompressor::{
    Allocator, BrotliDecompressStream, BrotliResult, BrotliState, SliceWrapper, SliceWrapperMut,
};

#[global_allocator]
static ALLOC: dlmalloc::GlobalDlmalloc = dlmalloc::GlobalDlmalloc;

#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    core::arch::wasm32::unreachable()
}

/// 展開後サイズの上限（256 MiB）
const MAX_OUTPUT: usize = 256 * 1024 * 1024;

/// 1回の `BrotliDecompressStream` で書き出す単位
const CHUNK: usize = 64 * 1024;

/// Brotliデコーダーの作業領域。グローバルアロケータから確保する。
#[derive(Default)]
struct HeapBuffer<T>(Box<[T]>);

impl<T> SliceWrapper<T> for HeapBuffer<T> {
    fn slice(&self) -> &[T] {
        &self.0
    }
}

impl<T> SliceWrapperMut<T> for HeapBuffer<T> {
    fn slice_mut(&mut self) -> &mut [T] {
        &mut self.0
    }
}

#[derive(Default, Clone, Copy)]
struct HeapAlloc;

impl<T: Default + Clone> Allocator<T> for HeapAlloc {
    type AllocatedMemory = HeapBuffer<T>;

    fn alloc_cell(&mut self, len: usize) -> HeapBuffer<T> {
        HeapBuffer(vec![T::default(); len].into_boxed_slice())
    }

    fn free_cell(&mut self, _data: HeapBuffer<T>) {}
}

/// ホストがWASMメモリにデータを書き込むために使用する。
#[no_mangle]
pub extern "C" fn alloc(size: u32) -> u32 {
    match core::alloc::Layout::from_size_align(size.max(1) as usize, 1) {
        Ok(layout) => unsafe { alloc::alloc::alloc(layout) as u32 },
        Err(_) => 0,
    }
}

/// バイト列を length-prefixed 結果バッファとして書き込み、ポインタを返す。
fn write_result(bytes: &[u8]) -> u32 {
    let Ok(len) = u32::try_from(bytes.len()) else {
        return 0;
    };
    let ptr = alloc(4 + len);
    if ptr == 0 {
        return 0;
    }
    unsafe {
        let p = ptr as *mut u8;
        core::ptr::copy_nonoverlapping(len.to_le_bytes().as_ptr(), p, 4);
        core::ptr::copy_nonoverlapping(bytes.as_ptr(), p.add(4), bytes.len());
    }
    ptr
}

fn inflate(compressed: &[u8]) -> Option<Vec<u8>> {
    let mut state: BrotliState<HeapAlloc, HeapAlloc, HeapAlloc> =
        BrotliState::new(HeapAlloc, HeapAlloc, HeapAlloc);
    let mut chunk = vec![0u8; CHUNK];
    let mut output = Vec::new();
    let mut available_in = compressed.len();
    let mut input_offset = 0;
    let mut total_out = 0;

    loop {
        let mut available_out = chunk.len();
        let mut output_offset = 0;
        let result = BrotliDecompressStream(
            &mut available_in,
            &mut input_offset,
            compressed,
            &mut available_out,
            &mut output_offset,
            &mut chunk,
            &mut total_out,
            &mut state,
        );
        output.extend_from_slice(&chunk[..output_offset]);
        if output.len() > MAX_OUTPUT {
            return None;
        }
        match result {
            BrotliResult::ResultSuccess => return Some(output),
            BrotliResult::NeedsMoreOutput => continue,
            // 入力は全て渡しているので、不足は途中で切れたストリーム
            BrotliResult::NeedsMoreInput | BrotliResult::ResultFailure => return None,
        }
    }
}

/// Brotliストリームを展開する。
///
/// 入力領域は `alloc` で確保されたもので、呼び出し後に解放する。
#[no_mangle]
pub extern "C" fn decompress(ptr: u32, len: u32) -> u32 {
    if ptr == 0 {
        return 0;
    }
    let input = unsafe { core::slice::from_raw_parts(ptr as *const u8, len as usize) };
    let result = match inflate(input) {
        Some(output) => write_result(&output),
        None => 0,
    };
    unsafe {
        let layout = core::alloc::Layout::from_size_align_unchecked((len as usize).max(1), 1);
        alloc::alloc::dealloc(ptr as *mut u8, layout);
    }
    result
}
